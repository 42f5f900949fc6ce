//! Canonical reply text and the spoken-reply rule guard
//!
//! Device and sensor replies are deterministic English templates. Free-form
//! LLM replies must obey the spoken-output rules (bounded length, no
//! emoji/icons/markdown, English only); the guard retries a rewrite a few
//! times and a deterministic sanitizer repairs whatever survives.

use crate::config::AssistantConfig;
use crate::llm::{prompts, ChatEngine, ChatMessage};
use tracing::debug;

use super::intent::{RelayState, Room, RoomTarget, SensorQuery};

fn join_labels(labels: &[&str]) -> String {
    match labels {
        [] => "selected rooms".to_string(),
        [one] => (*one).to_string(),
        [a, b] => format!("{} and {}", a, b),
        _ => {
            let head = &labels[..labels.len() - 1];
            format!("{}, and {}", head.join(", "), labels[labels.len() - 1])
        }
    }
}

pub fn format_device_reply(target: &RoomTarget, state: RelayState) -> String {
    let verb = match state {
        RelayState::On => "on",
        RelayState::Off => "off",
    };

    match target {
        RoomTarget::All => format!("I have turned {} all the lights.", verb),
        RoomTarget::Rooms(rooms) => {
            let mut labels: Vec<&str> = Vec::new();
            for room in rooms {
                let label = room.label();
                if !labels.contains(&label) {
                    labels.push(label);
                }
            }
            if labels.len() == 1 {
                format!("I have turned {} the light in {}.", verb, labels[0])
            } else {
                format!(
                    "I have turned {} the lights in {}.",
                    verb,
                    join_labels(&labels)
                )
            }
        }
    }
}

pub fn format_sensor_reply(
    reading: Option<&super::devices::SensorReading>,
    query: SensorQuery,
) -> String {
    let reading = match reading {
        Some(r) if r.ok => r,
        _ => return "I could not read temperature and humidity right now.".to_string(),
    };

    match (query.temperature, query.humidity) {
        (true, true) => format!(
            "Current temperature is {:.1} degrees Celsius and humidity is {:.1} percent.",
            reading.temperature_c, reading.humidity
        ),
        (true, false) => format!(
            "Current temperature is {:.1} degrees Celsius.",
            reading.temperature_c
        ),
        _ => format!("Current humidity is {:.1} percent.", reading.humidity),
    }
}

pub fn format_music_reply(track_name: &str, artist: &str) -> String {
    if artist.is_empty() {
        format!("Now playing {}.", track_name)
    } else {
        format!("Now playing {} by {}.", track_name, artist)
    }
}

// ─── Rule guard ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    TooManySentences,
    TooLong,
    HasEmoji,
    HasMarkdown,
    NonEnglish,
}

fn is_emoji_like(c: char) -> bool {
    matches!(c as u32,
        0x1F000..=0x1FFFF   // emoji planes
        | 0x2600..=0x27BF   // misc symbols, dingbats
        | 0x2190..=0x21FF   // arrows
        | 0x2B00..=0x2BFF   // more arrows/symbols
        | 0xFE00..=0xFE0F   // variation selectors
        | 0x2000..=0x200F   // invisible separators
    )
}

fn is_markdown_token(c: char) -> bool {
    matches!(c, '*' | '#' | '`' | '~')
}

pub fn count_sentences(text: &str) -> usize {
    let mut count = 0;
    let mut in_sentence = false;
    for c in text.chars() {
        if matches!(c, '.' | '!' | '?') {
            if in_sentence {
                count += 1;
                in_sentence = false;
            }
        } else if !c.is_whitespace() {
            in_sentence = true;
        }
    }
    if in_sentence {
        count += 1;
    }
    count
}

pub fn check_violations(text: &str, config: &AssistantConfig) -> Vec<Violation> {
    let mut violations = Vec::new();
    if count_sentences(text) > config.max_sentences {
        violations.push(Violation::TooManySentences);
    }
    if text.chars().count() > config.max_reply_chars {
        violations.push(Violation::TooLong);
    }
    if text.chars().any(is_emoji_like) {
        violations.push(Violation::HasEmoji);
    }
    if text.chars().any(is_markdown_token) {
        violations.push(Violation::HasMarkdown);
    }
    if text.chars().any(|c| c.is_alphabetic() && !c.is_ascii()) {
        violations.push(Violation::NonEnglish);
    }
    violations
}

/// Deterministic repair: strip emoji and markdown tokens, truncate to the
/// character limit on a word boundary, ensure terminal punctuation.
pub fn sanitize(text: &str, config: &AssistantConfig) -> String {
    let mut cleaned: String = text
        .chars()
        .filter(|&c| !is_emoji_like(c) && !is_markdown_token(c))
        .collect();
    cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    if cleaned.chars().count() > config.max_reply_chars {
        let mut truncated: String = cleaned.chars().take(config.max_reply_chars).collect();
        if let Some(pos) = truncated.rfind(' ') {
            truncated.truncate(pos);
        }
        cleaned = truncated.trim_end().to_string();
    }

    if cleaned.is_empty() {
        return cleaned;
    }
    if !cleaned.ends_with(['.', '!', '?']) {
        cleaned = cleaned.trim_end_matches([',', ';', ':']).to_string();
        cleaned.push('.');
    }
    cleaned
}

/// Enforce the spoken-reply rules: ask the model to rewrite up to
/// `rewrite_retries` times, then sanitize whatever is left.
pub async fn guard_reply(
    chat: &dyn ChatEngine,
    reply: &str,
    config: &AssistantConfig,
) -> String {
    let mut current = reply.trim().to_string();

    for attempt in 0..=config.rewrite_retries {
        let violations = check_violations(&current, config);
        if violations.is_empty() {
            return current;
        }
        if attempt == config.rewrite_retries {
            break;
        }
        debug!("reply violates {:?}, rewriting (attempt {})", violations, attempt + 1);
        let messages = vec![
            ChatMessage::system("You rewrite replies to fit strict constraints."),
            ChatMessage::user(prompts::rewrite_reply(
                &current,
                config.max_sentences,
                config.max_reply_chars,
            )),
        ];
        match chat.chat(&messages).await {
            Ok(rewritten) if !rewritten.trim().is_empty() => {
                current = rewritten.trim().to_string();
            }
            _ => break,
        }
    }

    sanitize(&current, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::devices::SensorReading;

    fn config() -> AssistantConfig {
        AssistantConfig {
            max_reply_chars: 60,
            max_sentences: 2,
            rewrite_retries: 0,
            history_max_entries: 10,
        }
    }

    #[test]
    fn test_device_reply_single() {
        let reply = format_device_reply(
            &RoomTarget::Rooms(vec![Room::Kitchen]),
            RelayState::On,
        );
        assert_eq!(reply, "I have turned on the light in kitchen.");
    }

    #[test]
    fn test_device_reply_multi() {
        let reply = format_device_reply(
            &RoomTarget::Rooms(vec![Room::Kitchen, Room::Living]),
            RelayState::Off,
        );
        assert_eq!(
            reply,
            "I have turned off the lights in kitchen and living room."
        );
    }

    #[test]
    fn test_device_reply_all() {
        assert_eq!(
            format_device_reply(&RoomTarget::All, RelayState::Off),
            "I have turned off all the lights."
        );
    }

    #[test]
    fn test_sensor_reply() {
        let reading = SensorReading {
            ok: true,
            temperature_c: 26.3,
            humidity: 55.0,
        };
        assert_eq!(
            format_sensor_reply(
                Some(&reading),
                SensorQuery {
                    temperature: true,
                    humidity: false
                }
            ),
            "Current temperature is 26.3 degrees Celsius."
        );
        assert_eq!(
            format_sensor_reply(
                None,
                SensorQuery {
                    temperature: true,
                    humidity: true
                }
            ),
            "I could not read temperature and humidity right now."
        );
    }

    #[test]
    fn test_count_sentences() {
        assert_eq!(count_sentences("One. Two! Three?"), 3);
        assert_eq!(count_sentences("No terminal punctuation"), 1);
        assert_eq!(count_sentences(""), 0);
        assert_eq!(count_sentences("Ellipsis... still one"), 2);
    }

    #[test]
    fn test_check_violations() {
        let cfg = config();
        assert!(check_violations("Short and clean.", &cfg).is_empty());
        assert!(check_violations("Has *markdown*.", &cfg).contains(&Violation::HasMarkdown));
        assert!(check_violations("One. Two. Three.", &cfg).contains(&Violation::TooManySentences));
    }

    #[test]
    fn test_sanitize_strips_and_truncates() {
        let cfg = config();
        let dirty = "# Heading with `code` and a very long tail that just keeps going on and on";
        let clean = sanitize(dirty, &cfg);
        assert!(!clean.contains('#'));
        assert!(!clean.contains('`'));
        assert!(clean.chars().count() <= cfg.max_reply_chars + 1);
        assert!(clean.ends_with('.'));
    }

    #[test]
    fn test_sanitize_terminal_punctuation() {
        let cfg = config();
        assert_eq!(sanitize("hello there", &cfg), "hello there.");
        assert_eq!(sanitize("done!", &cfg), "done!");
        assert_eq!(sanitize("", &cfg), "");
    }
}
