//! Intent classification for assistant utterances
//!
//! Works on a normalized copy of the transcript: lowercased, Vietnamese
//! diacritics folded to ASCII, whitespace collapsed. Exactly one branch is
//! selected, checked in priority order: device command, sensor query,
//! music request, free-form chat.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Known rooms with relay control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Room {
    Living,
    Kitchen,
    Bed,
    Bathroom,
    Garden,
}

impl Room {
    pub const ALL: [Room; 5] = [
        Room::Living,
        Room::Kitchen,
        Room::Bed,
        Room::Bathroom,
        Room::Garden,
    ];

    /// Key used on the relay wire
    pub fn key(self) -> &'static str {
        match self {
            Room::Living => "living",
            Room::Kitchen => "kitchen",
            Room::Bed => "bed",
            Room::Bathroom => "bathroom",
            Room::Garden => "garden",
        }
    }

    /// English label used in spoken replies
    pub fn label(self) -> &'static str {
        match self {
            Room::Living => "living room",
            Room::Kitchen => "kitchen",
            Room::Bed => "bedroom",
            Room::Bathroom => "bathroom",
            Room::Garden => "garden",
        }
    }

    fn aliases(self) -> &'static [&'static str] {
        match self {
            Room::Living => &["living room", "livingroom", "living", "lounge"],
            Room::Kitchen => &["kitchen", "cook room", "cookroom"],
            Room::Bed => &["bedroom", "bed room", "sleep room", "sleeproom", "bed"],
            Room::Bathroom => &["bathroom", "bath room", "restroom", "washroom", "toilet"],
            Room::Garden => &["garden", "yard", "backyard", "outside", "outdoor"],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayState {
    On,
    Off,
}

impl RelayState {
    pub fn as_str(self) -> &'static str {
        match self {
            RelayState::On => "on",
            RelayState::Off => "off",
        }
    }
}

/// Which rooms a device command targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomTarget {
    All,
    Rooms(Vec<Room>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCommand {
    pub state: RelayState,
    pub target: RoomTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SensorQuery {
    pub temperature: bool,
    pub humidity: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MusicRequest {
    pub query: String,
}

/// Result of classifying one utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentResult {
    Device(DeviceCommand),
    Sensor(SensorQuery),
    Music(MusicRequest),
    FreeForm,
}

static ALL_LIGHTS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(all|every)(?:\s+the)?\s+(light|lights|lamp|lamps)\b").expect("regex")
});
static ON_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(turn on|switch on|enable|open|power on|turn up)\b").expect("regex"));
static OFF_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(turn off|switch off|disable|close|power off|shut off|turn down)\b")
        .expect("regex")
});
static TEMP_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(temperature|temp)\b|nhiet\s*do|bao\s*nhieu\s*do").expect("regex"));
static HUMIDITY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(humidity|humid)\b|do\s*am").expect("regex"));
static MUSIC_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:play|put on)\s+(?:some\s+|the\s+song\s+|the\s+track\s+)?(.+)$")
        .expect("regex")
});

/// Fold a Vietnamese (or accented Latin) char to its base ASCII letter
fn fold_char(c: char) -> char {
    match c {
        'à' | 'á' | 'ả' | 'ã' | 'ạ' | 'ă' | 'ằ' | 'ắ' | 'ẳ' | 'ẵ' | 'ặ' | 'â' | 'ầ' | 'ấ'
        | 'ẩ' | 'ẫ' | 'ậ' => 'a',
        'è' | 'é' | 'ẻ' | 'ẽ' | 'ẹ' | 'ê' | 'ề' | 'ế' | 'ể' | 'ễ' | 'ệ' => 'e',
        'ì' | 'í' | 'ỉ' | 'ĩ' | 'ị' => 'i',
        'ò' | 'ó' | 'ỏ' | 'õ' | 'ọ' | 'ô' | 'ồ' | 'ố' | 'ổ' | 'ỗ' | 'ộ' | 'ơ' | 'ờ' | 'ớ'
        | 'ở' | 'ỡ' | 'ợ' => 'o',
        'ù' | 'ú' | 'ủ' | 'ũ' | 'ụ' | 'ư' | 'ừ' | 'ứ' | 'ử' | 'ữ' | 'ự' => 'u',
        'ỳ' | 'ý' | 'ỷ' | 'ỹ' | 'ỵ' => 'y',
        'đ' => 'd',
        other => other,
    }
}

/// Lowercase, fold diacritics, collapse whitespace
pub fn normalize_text(text: &str) -> String {
    let lowered: String = text.to_lowercase().chars().map(fold_char).collect();
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Earliest match position of any alias of `room`, or None
fn room_position(normalized: &str, room: Room) -> Option<usize> {
    room.aliases()
        .iter()
        .filter_map(|alias| normalized.find(alias))
        .min()
}

/// Rooms mentioned in the utterance, ordered by first mention
fn extract_rooms(normalized: &str) -> Vec<Room> {
    let mut hits: Vec<(usize, Room)> = Room::ALL
        .iter()
        .filter_map(|&room| room_position(normalized, room).map(|pos| (pos, room)))
        .collect();
    hits.sort_by_key(|&(pos, _)| pos);
    hits.into_iter().map(|(_, room)| room).collect()
}

pub fn detect_device_command(text: &str) -> Option<DeviceCommand> {
    let normalized = normalize_text(text);
    if normalized.is_empty() {
        return None;
    }

    let mut state = None;
    if ON_PATTERN.is_match(&normalized) {
        state = Some(RelayState::On);
    }
    if OFF_PATTERN.is_match(&normalized) {
        state = Some(RelayState::Off);
    }
    let state = state?;

    if ALL_LIGHTS.is_match(&normalized) {
        return Some(DeviceCommand {
            state,
            target: RoomTarget::All,
        });
    }

    let rooms = extract_rooms(&normalized);
    if rooms.is_empty() {
        return None;
    }
    Some(DeviceCommand {
        state,
        target: RoomTarget::Rooms(rooms),
    })
}

pub fn detect_sensor_query(text: &str) -> Option<SensorQuery> {
    let normalized = normalize_text(text);
    if normalized.is_empty() {
        return None;
    }

    let temperature = TEMP_PATTERN.is_match(&normalized);
    let humidity = HUMIDITY_PATTERN.is_match(&normalized);
    if !(temperature || humidity) {
        return None;
    }
    Some(SensorQuery {
        temperature,
        humidity,
    })
}

pub fn detect_music_request(text: &str) -> Option<MusicRequest> {
    let normalized = normalize_text(text);
    let caps = MUSIC_PATTERN.captures(&normalized)?;
    let mut query = caps.get(1)?.as_str().trim().to_string();

    for suffix in [" for me", " please", " song", " music"] {
        if let Some(stripped) = query.strip_suffix(suffix) {
            query = stripped.trim().to_string();
        }
    }
    // bare "play music" has nothing to search for
    if query.is_empty() || query == "music" || query == "a song" {
        return None;
    }
    Some(MusicRequest { query })
}

/// Select exactly one branch, in priority order.
pub fn classify(text: &str) -> IntentResult {
    if let Some(cmd) = detect_device_command(text) {
        return IntentResult::Device(cmd);
    }
    if let Some(query) = detect_sensor_query(text) {
        return IntentResult::Sensor(query);
    }
    if let Some(request) = detect_music_request(text) {
        return IntentResult::Music(request);
    }
    IntentResult::FreeForm
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_folds_vietnamese() {
        assert_eq!(normalize_text("Nhiệt độ bao nhiêu?"), "nhiet do bao nhieu?");
        assert_eq!(normalize_text("  Đèn   phòng  "), "den phong");
    }

    #[test]
    fn test_device_single_room() {
        let cmd = detect_device_command("Please turn on the kitchen light").unwrap();
        assert_eq!(cmd.state, RelayState::On);
        assert_eq!(cmd.target, RoomTarget::Rooms(vec![Room::Kitchen]));
    }

    #[test]
    fn test_device_multi_room_ordered_by_mention() {
        let cmd =
            detect_device_command("Turn off the kitchen and living room lights").unwrap();
        assert_eq!(cmd.state, RelayState::Off);
        assert_eq!(
            cmd.target,
            RoomTarget::Rooms(vec![Room::Kitchen, Room::Living])
        );
    }

    #[test]
    fn test_device_all_lights() {
        let cmd = detect_device_command("switch off all the lights").unwrap();
        assert_eq!(cmd.target, RoomTarget::All);
        assert_eq!(cmd.state, RelayState::Off);
    }

    #[test]
    fn test_device_requires_state_and_room() {
        assert!(detect_device_command("the kitchen is nice").is_none());
        assert!(detect_device_command("turn on the thing").is_none());
    }

    #[test]
    fn test_off_wins_over_on() {
        // "turn off" contains no "turn on" match; but both present -> off
        let cmd = detect_device_command("turn on no wait turn off the garden lamp").unwrap();
        assert_eq!(cmd.state, RelayState::Off);
    }

    #[test]
    fn test_sensor_query() {
        let q = detect_sensor_query("What is the temperature?").unwrap();
        assert!(q.temperature);
        assert!(!q.humidity);

        let q = detect_sensor_query("độ ẩm thế nào").unwrap();
        assert!(q.humidity);
    }

    #[test]
    fn test_music_request() {
        let m = detect_music_request("play some jazz for me").unwrap();
        assert_eq!(m.query, "jazz");
        assert!(detect_music_request("play music").is_none());
        assert!(detect_music_request("how are you").is_none());
    }

    #[test]
    fn test_classify_priority() {
        assert!(matches!(
            classify("turn on the kitchen light and play jazz"),
            IntentResult::Device(_)
        ));
        assert!(matches!(
            classify("what's the temperature"),
            IntentResult::Sensor(_)
        ));
        assert!(matches!(classify("play the song yesterday"), IntentResult::Music(_)));
        assert!(matches!(classify("tell me a story"), IntentResult::FreeForm));
    }
}
