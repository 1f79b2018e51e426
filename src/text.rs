//! Text helpers: folder-safe names, sentence segmentation and the sentence
//! post-processing strategies applied before synthesis.

/// Characters that are not allowed in file or folder names on common platforms.
const FORBIDDEN_NAME_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Make a document name usable as a folder name.
///
/// Each forbidden character becomes `_`, whitespace runs collapse to a single
/// space and the result is trimmed.
pub fn sanitize_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|ch| if FORBIDDEN_NAME_CHARS.contains(&ch) { '_' } else { ch })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split text into sentences.
///
/// A sentence ends after a run of `.`, `!`, `?` or `…` that is followed by
/// whitespace or the end of the text. A period between two digits never ends
/// a sentence, and an ellipsis stays attached to its sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        if ch.is_whitespace() {
            if !current.is_empty() && !current.ends_with(' ') {
                current.push(' ');
            }
            continue;
        }

        current.push(ch);
        if !is_terminator(ch) || is_decimal_point(text, idx, ch) {
            continue;
        }

        while let Some(&(_, next)) = chars.peek() {
            if !is_terminator(next) {
                break;
            }
            current.push(next);
            chars.next();
        }

        let at_boundary = chars.peek().map_or(true, |&(_, next)| next.is_whitespace());
        if at_boundary {
            flush_sentence(&mut sentences, &mut current);
        }
    }

    flush_sentence(&mut sentences, &mut current);
    sentences
}

fn is_terminator(ch: char) -> bool {
    matches!(ch, '.' | '!' | '?' | '…')
}

fn is_decimal_point(text: &str, idx: usize, ch: char) -> bool {
    if ch != '.' {
        return false;
    }
    let prev = text[..idx].chars().next_back();
    let next = text[idx + ch.len_utf8()..].chars().next();
    matches!(
        (prev, next),
        (Some(left), Some(right)) if left.is_ascii_digit() && right.is_ascii_digit()
    )
}

fn flush_sentence(sentences: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    current.clear();
}

/// Post-processing step applied to the sentences of a paragraph before they
/// reach the engine.
pub trait SentenceProcessor {
    fn process(&self, sentences: Vec<String>) -> Vec<String>;
}

impl<F> SentenceProcessor for F
where
    F: Fn(Vec<String>) -> Vec<String>,
{
    fn process(&self, sentences: Vec<String>) -> Vec<String> {
        self(sentences)
    }
}

/// Pass sentences through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepSentences;

impl SentenceProcessor for KeepSentences {
    fn process(&self, sentences: Vec<String>) -> Vec<String> {
        sentences
    }
}

/// Drop one trailing `.` from each sentence unless it ends in `...`.
///
/// XTTS tends to voice a final period as a short artefact.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrimTrailingPeriod;

impl SentenceProcessor for TrimTrailingPeriod {
    fn process(&self, sentences: Vec<String>) -> Vec<String> {
        sentences
            .into_iter()
            .map(|sentence| trim_trailing_period(&sentence).to_string())
            .collect()
    }
}

pub fn trim_trailing_period(sentence: &str) -> &str {
    if sentence.ends_with('.') && !sentence.ends_with("...") {
        &sentence[..sentence.len() - 1]
    } else {
        sentence
    }
}

/// Processor selected by the `remove_trailing_dots` setting.
pub fn processor_for(remove_trailing_dots: bool) -> Box<dyn SentenceProcessor> {
    if remove_trailing_dots {
        Box::new(TrimTrailingPeriod)
    } else {
        Box::new(KeepSentences)
    }
}
