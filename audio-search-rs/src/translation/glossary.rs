//! Text heuristics used around language detection, plus the Vietnamese
//! keyword glossary used when the translation provider is unavailable.

/// Longer phrases come before any phrase they contain.
const VI_GLOSSARY: &[(&str, &str)] = &[
    ("sấm sét", "thunder and lightning"),
    ("sấm", "thunder"),
    ("sét", "lightning"),
    ("bão", "storm"),
    ("mưa rào", "heavy rain"),
    ("mưa", "rain"),
    ("gió", "wind"),
    ("sóng biển", "ocean waves"),
    ("sóng", "waves"),
    ("nước chảy", "flowing water"),
    ("nước", "water"),
    ("lửa", "fire"),
    ("còi xe hơi", "car horn"),
    ("còi xe", "car horn"),
    ("còi tàu", "train horn"),
    ("còi", "horn"),
    ("xe hơi", "car"),
    ("xe máy", "motorcycle"),
    ("xe", "vehicle"),
    ("động cơ", "engine"),
    ("máy bay", "airplane"),
    ("tàu hỏa", "train"),
    ("tàu", "ship"),
    ("chó sủa", "dog barking"),
    ("chó", "dog"),
    ("mèo kêu", "cat meowing"),
    ("mèo", "cat"),
    ("chim hót", "bird singing"),
    ("chim", "bird"),
    ("gà gáy", "rooster crowing"),
    ("gà", "chicken"),
    ("tiếng cười", "laughter"),
    ("tiếng khóc", "crying"),
    ("vỗ tay", "applause"),
    ("la hét", "screaming"),
    ("nói chuyện", "talking"),
    ("hát", "singing"),
    ("cửa đóng", "door closing"),
    ("cửa", "door"),
    ("chuông", "bell"),
    ("đồng hồ", "clock"),
    ("điện thoại", "phone"),
    ("bước chân", "footsteps"),
    ("nổ", "explosion"),
    ("súng", "gunshot"),
    ("kính vỡ", "glass breaking"),
    ("nhạc tết", "festive new year music"),
    ("nhạc xuân", "spring festival music"),
    ("nhạc năm mới", "new year music"),
    ("nhạc kinh dị", "horror music"),
    ("nhạc buồn", "sad music"),
    ("nhạc vui", "happy music"),
    ("nhạc sôi động", "energetic music"),
    ("nhạc nhẹ nhàng", "gentle relaxing music"),
    ("nhạc nền", "background music"),
    ("nhạc phim", "film music soundtrack"),
    ("nhạc quảng cáo", "commercial advertisement music"),
    ("nhạc trao giải", "award ceremony triumphant music"),
    ("nhạc lễ trao giải", "award ceremony triumphant fanfare music"),
    ("nhạc", "music"),
    ("bài hát", "song"),
    ("ca khúc", "song"),
    ("rap", "rap"),
    ("hip hop", "hip hop"),
    ("hip-hop", "hip hop"),
];

/// "tiếng" / "âm thanh" mark a request for the sound of something.
const VI_SOUND_MARKERS: &[&str] = &["tiếng", "âm thanh"];

const VIETNAMESE_LOWER: &str =
    "àáảãạăằắẳẵặâầấẩẫậèéẻẽẹêềếểễệìíỉĩịòóỏõọôồốổỗộơờớởỡợùúủũụưừứửữựỳýỷỹỵđ";

/// Replace Vietnamese terms with English equivalents. Returns an empty string
/// when nothing usable is left.
pub fn apply_vietnamese_glossary(text: &str) -> String {
    let lowered = text.to_lowercase();
    let sound_hint = VI_SOUND_MARKERS.iter().any(|m| lowered.contains(m));

    let mut cleaned = lowered;
    for marker in VI_SOUND_MARKERS {
        cleaned = cleaned.replace(marker, " ");
    }
    for (vietnamese, english) in VI_GLOSSARY {
        cleaned = cleaned.replace(vietnamese, english);
    }

    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if sound_hint {
        format!("sound of {cleaned}").trim().to_string()
    } else {
        cleaned
    }
}

/// No alphanumeric character at all (emoji, punctuation, whitespace).
pub fn is_non_textual(text: &str) -> bool {
    !text.chars().any(char::is_alphanumeric)
}

pub fn contains_non_ascii_letters(text: &str) -> bool {
    text.chars().any(|c| c.is_alphabetic() && !c.is_ascii())
}

/// For mixed-script text keep only the letters of the larger script, which
/// confuses detectors less than the raw mix.
pub fn extract_dominant_text(text: &str) -> String {
    let ascii: String = text
        .chars()
        .filter(|c| c.is_ascii() && c.is_alphabetic())
        .collect();
    let non_ascii: String = text
        .chars()
        .filter(|c| !c.is_ascii() && c.is_alphabetic())
        .collect();
    if ascii.is_empty() || non_ascii.is_empty() {
        return text.to_string();
    }
    if ascii.chars().count() >= non_ascii.chars().count() {
        ascii
    } else {
        non_ascii
    }
}

fn is_vietnamese(c: char) -> bool {
    c.to_lowercase().any(|l| VIETNAMESE_LOWER.contains(l))
}

fn is_chinese(c: char) -> bool {
    matches!(c as u32, 0x4E00..=0x9FFF | 0x3400..=0x4DBF | 0x20000..=0x2A6DF)
}

fn is_japanese_kana(c: char) -> bool {
    matches!(c as u32, 0x3040..=0x309F | 0x30A0..=0x30FF)
}

fn is_korean(c: char) -> bool {
    matches!(c as u32, 0xAC00..=0xD7AF | 0x1100..=0x11FF)
}

fn is_thai(c: char) -> bool {
    matches!(c as u32, 0x0E00..=0x0E7F)
}

/// Guess a language from characteristic Unicode ranges. Ties go to the
/// earlier language in `vi, zh, ja, ko, th`; `None` when nothing matched.
pub fn infer_language_from_characters(text: &str) -> Option<&'static str> {
    let count = |pred: fn(char) -> bool| text.chars().filter(|c| pred(*c)).count();
    let chinese = count(is_chinese);
    let counts = [
        ("vi", count(is_vietnamese)),
        ("zh", chinese),
        // Japanese text usually mixes in kanji
        ("ja", count(is_japanese_kana) + chinese / 2),
        ("ko", count(is_korean)),
        ("th", count(is_thai)),
    ];

    let mut best = counts[0];
    for candidate in &counts[1..] {
        if candidate.1 > best.1 {
            best = *candidate;
        }
    }
    (best.1 > 0).then_some(best.0)
}

/// Truncate to at most `max_chars` characters (not bytes).
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glossary_prefers_longer_phrases() {
        assert_eq!(apply_vietnamese_glossary("còi xe hơi"), "car horn");
        assert_eq!(apply_vietnamese_glossary("nhạc buồn"), "sad music");
    }

    #[test]
    fn glossary_adds_sound_prefix_for_markers() {
        assert_eq!(apply_vietnamese_glossary("Tiếng mưa"), "sound of rain");
        assert_eq!(apply_vietnamese_glossary("âm thanh chó sủa"), "sound of dog barking");
    }

    #[test]
    fn non_textual_detection() {
        assert!(is_non_textual("🙂🙂"));
        assert!(is_non_textual("?! ..."));
        assert!(!is_non_textual("🙂 rain"));
        assert!(!is_non_textual("42"));
    }

    #[test]
    fn dominant_text_picks_larger_script() {
        assert_eq!(extract_dominant_text("rain 雨"), "rain");
        // plain letters inside Vietnamese words count as ASCII
        assert_eq!(extract_dominant_text("tiếng mưa"), "tingma");
        assert_eq!(extract_dominant_text("bão"), "bo");
        assert_eq!(extract_dominant_text("雨"), "雨");
        assert_eq!(extract_dominant_text("dog 犬犬犬犬"), "犬犬犬犬");
    }

    #[test]
    fn infers_languages_from_ranges() {
        assert_eq!(infer_language_from_characters("bão"), Some("vi"));
        assert_eq!(infer_language_from_characters("ĐÊM"), Some("vi"));
        assert_eq!(infer_language_from_characters("雨の音"), Some("zh"));
        assert_eq!(infer_language_from_characters("あめのおと"), Some("ja"));
        assert_eq!(infer_language_from_characters("빗소리"), Some("ko"));
        assert_eq!(infer_language_from_characters("ฝนตก"), Some("th"));
        assert_eq!(infer_language_from_characters("naïve"), None);
    }

    #[test]
    fn truncation_counts_characters() {
        assert_eq!(truncate_chars("ééé", 2), "éé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
