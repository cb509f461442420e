//! Keystroke policy: how one chat message becomes terminal input.
//!
//! The assistant's prompt UI treats digits as instant option picks, so an
//! option selection must not be followed by Enter, while free text needs a
//! second Enter in case the first was consumed as a newline inside paste
//! mode. Option-with-instructions drives the option menu (Down/Tab), then
//! types the amendment.

use std::time::Duration;

use tether_muxer::{Key, Muxer};

/// Classified form of an inbound text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Keystrokes {
    /// `"3 try the other file"`, `"yes but check tests first"`: pick an
    /// option and attach instructions through the amendment input.
    OptionWithInstructions { option: u8, instructions: String },
    /// A bare `1`..`9`, `yes`/`y`, `no`/`n`.
    SimpleOption(u8),
    FreeText(String),
}

pub fn classify(text: &str) -> Keystrokes {
    let trimmed = text.trim();
    let lowered = trimmed.to_ascii_lowercase();

    if let Some(option) = simple_option_digit(&lowered) {
        return Keystrokes::SimpleOption(option);
    }

    if let Some((option, instructions)) = option_with_instructions(trimmed, &lowered) {
        return Keystrokes::OptionWithInstructions {
            option,
            instructions,
        };
    }

    Keystrokes::FreeText(trimmed.to_string())
}

/// True for anything that is not plain free text.
pub fn is_option_input(text: &str) -> bool {
    !matches!(classify(text), Keystrokes::FreeText(_))
}

/// A plain rejection gets no completion event from the assistant, so the
/// processing reaction has to be cleared on a timer instead.
pub fn is_plain_rejection(text: &str) -> bool {
    matches!(classify(text), Keystrokes::SimpleOption(3))
}

fn simple_option_digit(lowered: &str) -> Option<u8> {
    match lowered {
        "y" | "yes" => return Some(1),
        "n" | "no" => return Some(3),
        _ => {}
    }
    let mut chars = lowered.chars();
    match (chars.next(), chars.next()) {
        (Some(digit @ '1'..='9'), None) => Some(digit as u8 - b'0'),
        _ => None,
    }
}

fn option_with_instructions(trimmed: &str, lowered: &str) -> Option<(u8, String)> {
    // `^[1-9]\.?\s+(.+)$`
    let mut chars = trimmed.chars();
    if let Some(digit @ '1'..='9') = chars.next() {
        let mut rest = chars.as_str();
        if let Some(stripped) = rest.strip_prefix('.') {
            rest = stripped;
        }
        if rest.starts_with(char::is_whitespace) {
            let instructions = rest.trim();
            if !instructions.is_empty() {
                return Some((digit as u8 - b'0', instructions.to_string()));
            }
        }
    }

    // `^(yes|y)\s+(.+)$` and `^(no|n)\s+(.+)$`
    for (prefix, option) in [("yes", 1), ("y", 1), ("no", 3), ("n", 3)] {
        if let Some(rest) = lowered.strip_prefix(prefix) {
            if rest.starts_with(char::is_whitespace) {
                let instructions = trimmed[prefix.len()..].trim();
                if !instructions.is_empty() {
                    return Some((option, instructions.to_string()));
                }
            }
        }
    }

    None
}

/// Delays used while driving the option menu.
#[derive(Debug, Clone, Copy)]
pub struct SendPacing {
    pub keystroke_gap: Duration,
    pub option_ui_delay: Duration,
}

/// Inject `text` into a window per the classification rules.
pub async fn send(
    muxer: &dyn Muxer,
    session: &str,
    window: &str,
    text: &str,
    pacing: SendPacing,
) -> tether_muxer::Result<()> {
    match classify(text) {
        Keystrokes::OptionWithInstructions {
            option,
            instructions,
        } => {
            for _ in 1..option {
                muxer.send_key(session, window, Key::Down).await?;
                tokio::time::sleep(pacing.keystroke_gap).await;
            }
            muxer.send_key(session, window, Key::Tab).await?;
            tokio::time::sleep(pacing.option_ui_delay).await;
            muxer.send_literal(session, window, &instructions).await?;
            tokio::time::sleep(pacing.option_ui_delay).await;
            muxer.send_key(session, window, Key::Enter).await?;
        }
        Keystrokes::SimpleOption(option) => {
            // Digits auto-confirm in the assistant UI; no Enter.
            muxer
                .send_literal(session, window, &option.to_string())
                .await?;
        }
        Keystrokes::FreeText(text) => {
            send_free_text(muxer, session, window, &text, pacing).await?;
        }
    }
    Ok(())
}

/// Inject text verbatim, skipping classification. Used by the `!say`
/// escape so a message that happens to start with a digit still forwards
/// as plain text.
pub async fn send_free_text(
    muxer: &dyn Muxer,
    session: &str,
    window: &str,
    text: &str,
    pacing: SendPacing,
) -> tether_muxer::Result<()> {
    muxer.send_literal(session, window, text).await?;
    muxer.send_key(session, window, Key::Enter).await?;
    tokio::time::sleep(pacing.keystroke_gap).await;
    muxer.send_key(session, window, Key::Enter).await?;
    Ok(())
}
