//! Query enhancement: use-case → music style mapping, synonym expansion and
//! prompt-template variants that get embedded and averaged.

use crate::content_type::ContentType;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};

pub const SONG_PROMPT_TEMPLATES: &[&str] = &[
    "{query}",
    "music: {query}",
    "background music for {query}",
    "instrumental music {query}",
];

pub const SFX_PROMPT_TEMPLATES: &[&str] = &[
    "sound of {query}",
    "sound effect: {query}",
    "{query} audio",
    "{query} sound",
];

const FILLER_WORDS: &[&str] = &["music", "song", "for", "the", "a", "an"];

/// Contextual phrases mapped to descriptors the music model actually understands.
const USE_CASE_MUSIC_MAPPINGS: &[(&str, &str)] = &[
    ("award ceremony", "triumphant orchestral fanfare victory celebration music"),
    ("awards ceremony", "triumphant orchestral fanfare victory celebration music"),
    ("award presentation", "triumphant orchestral fanfare victory music"),
    ("prize giving", "triumphant orchestral fanfare celebration music"),
    ("prize ceremony", "triumphant orchestral fanfare celebration music"),
    ("award", "triumphant orchestral fanfare celebration music"),
    ("awards", "triumphant orchestral fanfare celebration music"),
    ("ceremony", "elegant orchestral ceremonial grand music"),
    ("victory", "triumphant epic orchestral celebration fanfare"),
    ("winner", "triumphant celebration fanfare victorious music"),
    ("prize", "triumphant orchestral fanfare music"),
    ("celebration", "upbeat celebratory happy joyful festive music"),
    ("triumph", "triumphant epic orchestral victorious fanfare"),
    ("glory", "triumphant epic majestic orchestral music"),
    ("car advertisement", "energetic modern driving electronic powerful beat music"),
    ("car commercial", "powerful dynamic driving rock electronic energetic music"),
    ("car ad", "energetic modern driving electronic powerful music"),
    ("automobile advertisement", "energetic driving modern electronic powerful music"),
    ("vehicle advertisement", "dynamic driving energetic modern powerful music"),
    ("car", "energetic driving electronic rock powerful music"),
    ("automobile", "energetic driving modern electronic music"),
    ("vehicle", "dynamic driving energetic modern beat"),
    ("driving", "energetic electronic rock road trip upbeat music"),
    ("new year", "festive celebratory happy traditional joyful holiday music"),
    ("happy new year", "festive celebratory joyful traditional holiday music"),
    ("lunar new year", "festive traditional asian celebration joyful music"),
    ("spring festival", "festive traditional asian celebratory joyful music"),
    ("tet", "festive vietnamese traditional celebration joyful music"),
    ("tet holiday", "festive vietnamese traditional joyful celebration music"),
    ("holiday", "festive cheerful warm holiday celebration joyful music"),
    ("christmas", "festive warm holiday traditional christmas joyful music"),
    ("festival", "festive celebratory upbeat traditional joyful music"),
    ("festive", "festive celebratory joyful upbeat happy music"),
    ("corporate", "professional inspiring motivational confident business music"),
    ("business", "professional corporate inspiring confident modern music"),
    ("presentation", "professional confident corporate inspiring modern music"),
    ("technology", "modern electronic futuristic innovative tech inspiring music"),
    ("tech", "modern electronic digital futuristic innovative music"),
    ("startup", "energetic modern inspiring innovative tech upbeat music"),
    ("advertisement", "catchy upbeat modern energetic commercial music"),
    ("commercial", "catchy upbeat modern energetic professional music"),
    ("advertising", "catchy modern energetic upbeat commercial music"),
    ("wedding", "romantic elegant beautiful emotional tender love music"),
    ("funeral", "sad somber emotional melancholic peaceful gentle music"),
    ("romantic", "romantic beautiful emotional tender love heartfelt music"),
    ("love", "romantic tender emotional beautiful heartfelt gentle music"),
    ("sad", "melancholic emotional sorrowful gentle piano music"),
    ("happy", "joyful upbeat cheerful happy positive bright music"),
    ("action", "intense energetic powerful dramatic epic driving music"),
    ("sports", "energetic powerful dynamic motivational pump up music"),
    ("workout", "energetic high tempo powerful motivational beat music"),
    ("gaming", "energetic electronic intense dynamic exciting game music"),
    ("game", "energetic electronic dynamic exciting playful music"),
    ("trailer", "epic cinematic dramatic intense powerful orchestral music"),
    ("movie", "cinematic orchestral dramatic emotional film score music"),
    ("film", "cinematic orchestral dramatic emotional soundtrack music"),
    ("nature", "peaceful ambient relaxing calm natural atmospheric music"),
    ("relaxation", "calm peaceful soothing gentle ambient relaxing music"),
    ("meditation", "calm peaceful ambient meditative spiritual gentle music"),
    ("spa", "relaxing calm soothing peaceful gentle ambient music"),
    ("sleep", "calm gentle soothing peaceful ambient quiet music"),
    ("horror", "dark tense eerie suspenseful creepy scary atmospheric music"),
    ("scary", "dark tense eerie suspenseful creepy horror atmospheric music"),
    ("thriller", "tense suspenseful dark mysterious dramatic music"),
    ("suspense", "tense suspenseful mysterious dark dramatic music"),
    ("creepy", "eerie dark atmospheric unsettling mysterious music"),
];

/// Term → related terms, in preference order.
const SYNONYM_MAPPINGS: &[(&str, &[&str])] = &[
    ("rap", &["hip hop", "rapping vocal", "hip-hop beat"]),
    ("hip hop", &["rap", "rapping vocal", "hip-hop beat"]),
    ("hip-hop", &["rap", "hip hop", "rapping vocal"]),
    ("edm", &["electronic dance music", "electronic beat", "dance music"]),
    ("electronic dance music", &["edm", "electronic beat", "dance music"]),
    ("rnb", &["r&b", "rhythm and blues", "soul music"]),
    ("r&b", &["rnb", "rhythm and blues", "soul music"]),
    ("lofi", &["lo-fi", "lo fi beats", "chillhop relaxing"]),
    ("lo-fi", &["lofi", "lo fi beats", "chillhop relaxing"]),
    ("storm", &["thunder", "thunderstorm", "heavy rain wind"]),
    ("thunder", &["storm", "thunderstorm", "lightning"]),
    ("thunderstorm", &["storm", "thunder", "heavy rain"]),
    ("rain", &["rainfall", "raining", "rainy weather"]),
    ("wind", &["windy", "gust", "breeze"]),
    ("scary", &["horror", "creepy eerie", "spooky frightening tense"]),
    ("horror", &["scary", "creepy eerie", "spooky frightening dark tense"]),
    ("creepy", &["scary", "horror dark", "eerie spooky"]),
    ("happy", &["joyful", "cheerful upbeat", "uplifting positive"]),
    ("sad", &["melancholy", "melancholic emotional", "sorrowful mournful"]),
    ("epic", &["cinematic dramatic", "grand orchestral", "powerful majestic"]),
    ("cinematic", &["epic dramatic", "film score", "movie orchestral"]),
    ("chill", &["relaxing calm", "mellow laid-back", "peaceful ambient"]),
    ("relaxing", &["chill calm", "peaceful soothing", "gentle ambient"]),
    ("guitar", &["acoustic guitar", "electric guitar", "guitar melody"]),
    ("piano", &["keyboard", "piano melody", "keys instrumental"]),
    ("drums", &["percussion", "drum beat", "rhythmic drums"]),
    ("synth", &["synthesizer", "electronic synth", "synth melody"]),
    ("fast", &["upbeat", "high tempo energetic", "quick dynamic"]),
    ("slow", &["slow tempo", "mellow gentle", "laid-back calm"]),
    ("energetic", &["high energy", "upbeat powerful", "dynamic intense"]),
];

lazy_static! {
    /// Use cases, longest phrase first so "car commercial" beats "car".
    static ref USE_CASES_BY_LENGTH: Vec<(&'static str, &'static str)> = {
        let mut v = USE_CASE_MUSIC_MAPPINGS.to_vec();
        v.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        v
    };

    static ref WORD_PATTERNS: HashMap<&'static str, Regex> = {
        let mut patterns = HashMap::new();
        let words = USE_CASE_MUSIC_MAPPINGS
            .iter()
            .map(|(k, _)| *k)
            .chain(SYNONYM_MAPPINGS.iter().flat_map(|(term, syns)| {
                std::iter::once(*term).chain(syns.iter().copied())
            }));
        for word in words {
            patterns.entry(word).or_insert_with(|| word_pattern(word));
        }
        patterns
    };
}

fn word_pattern(word: &str) -> Regex {
    Regex::new(&format!(r"(?i)\b{}\b", regex::escape(word))).expect("escaped word pattern")
}

fn pattern_for(word: &'static str) -> &'static Regex {
    &WORD_PATTERNS[word]
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnhancedQuery {
    pub original: String,
    pub expanded: String,
    /// Never empty; the expanded text itself is always present.
    pub variants: Vec<String>,
    /// `use-case:<phrase>` and `term→synonym` labels, for logs.
    pub applied: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct QueryEnhancer {
    enable_synonyms: bool,
    enable_templates: bool,
}

impl Default for QueryEnhancer {
    fn default() -> Self {
        Self::new(true, true)
    }
}

impl QueryEnhancer {
    pub fn new(enable_synonyms: bool, enable_templates: bool) -> Self {
        info!(
            synonyms = enable_synonyms,
            templates = enable_templates,
            "Query enhancer initialized"
        );
        Self {
            enable_synonyms,
            enable_templates,
        }
    }

    pub fn process_query(&self, text: &str, content_type: ContentType) -> EnhancedQuery {
        let original = text.trim().to_string();
        let mut expanded = original.clone();
        let mut applied = Vec::new();

        if content_type == ContentType::Song {
            if let Some((mapped, use_case)) = apply_use_case_mapping(&original) {
                info!(from = %original, to = %mapped, "Applied use-case mapping");
                applied.push(format!("use-case:{use_case}"));
                expanded = mapped;
            }
        }

        if self.enable_synonyms {
            let (with_synonyms, labels) = expand_synonyms(&expanded);
            expanded = with_synonyms;
            applied.extend(labels);
        }

        let mut variants: Vec<String> = Vec::new();
        if self.enable_templates {
            let templates = match content_type {
                ContentType::Song => SONG_PROMPT_TEMPLATES,
                ContentType::Sfx => SFX_PROMPT_TEMPLATES,
            };
            variants.extend(templates.iter().map(|t| t.replace("{query}", &expanded)));
        }
        if !variants.contains(&expanded) {
            variants.insert(0, expanded.clone());
        }

        EnhancedQuery {
            original,
            expanded,
            variants,
            applied,
        }
    }
}

/// Replace the first (longest) matching use-case phrase with its music style,
/// keeping whatever descriptive words remain once fillers are dropped.
fn apply_use_case_mapping(query: &str) -> Option<(String, &'static str)> {
    let lowered = query.to_lowercase();
    let (use_case, style) = USE_CASES_BY_LENGTH
        .iter()
        .find(|(use_case, _)| pattern_for(use_case).is_match(&lowered))?;

    let remaining = pattern_for(use_case).replace_all(&lowered, " ");
    let descriptors: Vec<&str> = remaining
        .split_whitespace()
        .filter(|w| !FILLER_WORDS.contains(w))
        .collect();

    let expanded = if descriptors.is_empty() {
        style.to_string()
    } else {
        format!("{} {}", style, descriptors.join(" "))
    };
    Some((expanded, *use_case))
}

/// Append one not-yet-present synonym per matched term.
fn expand_synonyms(query: &str) -> (String, Vec<String>) {
    let lowered = query.to_lowercase();
    let mut additions: Vec<&str> = Vec::new();
    let mut labels = Vec::new();

    for (term, synonyms) in SYNONYM_MAPPINGS {
        if !pattern_for(term).is_match(&lowered) {
            continue;
        }
        if let Some(synonym) = synonyms
            .iter()
            .find(|syn| !pattern_for(syn).is_match(&lowered))
        {
            additions.push(*synonym);
            labels.push(format!("{term}→{synonym}"));
        }
    }

    if additions.is_empty() {
        return (query.to_string(), labels);
    }
    let expanded = format!("{} {}", query, additions.join(" "));
    debug!(from = %query, to = %expanded, synonyms = ?labels, "Expanded query");
    (expanded, labels)
}
