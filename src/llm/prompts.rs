//! Prompt builders for the translation / summary / assistant passes
//!
//! Every prompt instructs the model to answer with the bare text so the
//! output can go straight onto the wire without post-parsing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed language set supported by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    En,
    Vi,
    Zh,
}

impl Lang {
    /// Full name used inside prompts
    pub fn display_name(self) -> &'static str {
        match self {
            Lang::En => "English",
            Lang::Vi => "Vietnamese",
            Lang::Zh => "Chinese (Traditional if possible)",
        }
    }

    /// ISO-style code for the STT engine
    pub fn code(self) -> &'static str {
        match self {
            Lang::En => "en",
            Lang::Vi => "vi",
            Lang::Zh => "zh",
        }
    }
}

impl FromStr for Lang {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "en" => Ok(Lang::En),
            "vi" => Ok(Lang::Vi),
            "zh" => Ok(Lang::Zh),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Lang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

fn or_placeholder(s: &str, placeholder: &str) -> String {
    let t = s.trim();
    if t.is_empty() {
        placeholder.to_string()
    } else {
        t.to_string()
    }
}

/// Realtime prompt: translate ONE new segment, anchored on the conversation
/// title and the bilingual topic memory so terminology stays consistent.
pub fn translate_segment(
    source: Lang,
    target: Lang,
    title_name: &str,
    title_context_tail: &str,
    summary_context: &str,
    segment: &str,
) -> String {
    let title = or_placeholder(title_name, "(untitled)");
    let tail = or_placeholder(title_context_tail, "(none)");
    let seg = segment.trim();

    let summary_block = if summary_context.trim().is_empty() {
        String::new()
    } else {
        format!(
            "\nRUNNING SUMMARY (long-term context):\n{}\n",
            summary_context.trim()
        )
    };

    format!(
        "You are a professional real-time translator.\n\n\
         CONVERSATION TITLE: {title}\n\n\
         RULES:\n\
         - Translate from {src} to {tgt}.\n\
         - Output ONLY the translated text. No explanation.\n\
         - Keep technical terms consistent with the conversation title and topic memory.\n\
         - Preserve numbers, names, abbreviations, and units exactly.\n\
         - If {tgt} is Vietnamese, use natural Vietnamese.\n\
         - If {tgt} is Chinese, prefer Traditional Chinese if possible.\n\n\
         TOPIC MEMORY (recent tail, bilingual):\n{tail}\n\
         {summary_block}\n\
         NEW SEGMENT (translate this):\n{seg}\n",
        title = title,
        src = source.display_name(),
        tgt = target.display_name(),
        tail = tail,
        summary_block = summary_block,
        seg = seg,
    )
}

/// Stop-time prompt: retranslate the whole source for coherence.
pub fn final_translate(
    source: Lang,
    target: Lang,
    title_name: &str,
    title_context_tail: &str,
    full_source: &str,
) -> String {
    let title = or_placeholder(title_name, "(untitled)");
    let tail = or_placeholder(title_context_tail, "(none)");

    format!(
        "You are a professional translator.\n\n\
         CONVERSATION TITLE: {title}\n\n\
         TASK:\n\
         - Translate the FULL TEXT from {src} to {tgt}.\n\
         - Output ONLY the final translated text (no commentary).\n\
         - Make it coherent, fluent, and consistent.\n\
         - Keep technical terminology consistent with the conversation title and topic memory.\n\
         - Preserve line breaks as much as possible.\n\n\
         TOPIC MEMORY (recent tail, bilingual):\n{tail}\n\n\
         FULL TEXT:\n{src_text}\n",
        title = title,
        src = source.display_name(),
        tgt = target.display_name(),
        tail = tail,
        src_text = full_source.trim(),
    )
}

/// Clean raw STT output before the final translation pass.
pub fn refine_source(source: Lang, title_name: &str, full_source: &str) -> String {
    let title = or_placeholder(title_name, "(untitled)");

    format!(
        "You are a professional editor specializing in correcting speech-to-text (STT) output.\n\n\
         CONVERSATION TITLE: {title}\n\
         SOURCE LANGUAGE: {src}\n\n\
         TASK:\n\
         - Review the raw STT text below\n\
         - Fix speech recognition errors (homophones, missing words, mishearing)\n\
         - Add proper punctuation and capitalization\n\
         - Correct grammar while preserving original intent\n\
         - Fill logical gaps or missing context based on the conversation title\n\
         - Ensure coherence and logical flow\n\
         - Output ONLY the refined text (no explanation or commentary)\n\
         - Preserve line breaks structure\n\n\
         RAW STT TEXT (may contain errors):\n{src_text}\n",
        title = title,
        src = source.display_name(),
        src_text = full_source.trim(),
    )
}

/// Rolling summary for long-term context.
pub fn summary(source: Lang, full_source: &str) -> String {
    format!(
        "You are a precise note-taker.\n\n\
         TASK:\n\
         - Summarize the {src} transcript below into 3-6 bullet points.\n\
         - Preserve every entity, number, and technical term exactly as written.\n\
         - Output ONLY the bullet points, one per line, starting with \"- \".\n\
         - No preamble, no commentary.\n\n\
         TRANSCRIPT:\n{src_text}\n",
        src = source.display_name(),
        src_text = full_source.trim(),
    )
}

/// Short conversation title from the opening message.
pub fn conversation_title(user_text: &str) -> String {
    format!(
        "Based on the user's message, generate a very short chat title (max 6 words). \
         Return ONLY the title, no quotes, no punctuation.\n\
         User message: {}",
        user_text.trim(),
    )
}

/// Rewrite instruction used by the assistant rule-guard.
pub fn rewrite_reply(reply: &str, max_sentences: usize, max_chars: usize) -> String {
    format!(
        "Rewrite the reply below so that it:\n\
         - Has at most {max_sentences} sentences and {max_chars} characters.\n\
         - Is plain English text with no emojis, icons, or markdown.\n\
         - Keeps the original meaning.\n\
         Return ONLY the rewritten reply.\n\n\
         REPLY:\n{reply}\n",
        max_sentences = max_sentences,
        max_chars = max_chars,
        reply = reply.trim(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lang_parse() {
        assert_eq!("en".parse::<Lang>(), Ok(Lang::En));
        assert_eq!(" VI ".parse::<Lang>(), Ok(Lang::Vi));
        assert!("fr".parse::<Lang>().is_err());
    }

    #[test]
    fn test_segment_prompt_placeholders() {
        let p = translate_segment(Lang::En, Lang::Vi, "", "", "", "hello");
        assert!(p.contains("(untitled)"));
        assert!(p.contains("(none)"));
        assert!(p.contains("English"));
        assert!(p.contains("Vietnamese"));
        assert!(!p.contains("RUNNING SUMMARY"));
    }

    #[test]
    fn test_segment_prompt_with_summary() {
        let p = translate_segment(Lang::En, Lang::Zh, "Demo", "SOURCE: a\nTARGET: b", "- fact", "x");
        assert!(p.contains("RUNNING SUMMARY"));
        assert!(p.contains("- fact"));
    }
}
