//! Text preparation: validation, sentence splitting and chunk packing.

use crate::error::{Result, TtsError};

/// Split `text` into generation chunks of at most `max_chars` characters.
///
/// Sentences are kept together where possible and packed greedily; a sentence
/// that is longer than `max_chars` is broken at whitespace. Words are never
/// split, so a single word longer than `max_chars` becomes its own chunk.
/// Every chunk is passed through [`normalize_chunk`].
pub fn prepare_chunks(text: &str, max_chars: usize) -> Result<Vec<String>> {
    if text.trim().is_empty() {
        return Err(TtsError::EmptyText);
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    for sentence in split_sentences(text) {
        for piece in split_words(&sentence, max_chars) {
            if current.is_empty() {
                current = piece;
            } else if char_len(&current) + 1 + char_len(&piece) <= max_chars {
                current.push(' ');
                current.push_str(&piece);
            } else {
                chunks.push(std::mem::take(&mut current));
                current = piece;
            }
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    let chunks: Vec<String> = chunks
        .iter()
        .map(|c| normalize_chunk(c))
        .filter(|c| !c.is_empty())
        .collect();
    if chunks.is_empty() {
        return Err(TtsError::EmptyText);
    }
    Ok(chunks)
}

/// Tidy a chunk before tokenization: collapse whitespace, capitalize the
/// first letter and close it with a period if it ends mid-sentence.
pub fn normalize_chunk(chunk: &str) -> String {
    let mut out = chunk.split_whitespace().collect::<Vec<_>>().join(" ");

    if let Some(first) = out.chars().next() {
        if first.is_lowercase() {
            let upper: String = first.to_uppercase().collect();
            out.replace_range(..first.len_utf8(), &upper);
        }
    }
    if out.chars().next_back().is_some_and(char::is_alphanumeric) {
        out.push('.');
    }
    out
}

/// Split on `.`, `!`, `?` (and their CJK forms), keeping the punctuation and
/// any closing quotes or brackets with the sentence.
///
/// A period between two digits (`2.5`) does not end a sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    let mut prev: Option<char> = None;

    while let Some(c) = chars.next() {
        current.push(c);

        if is_terminal(c) {
            let next = chars.peek().copied();
            let decimal = c == '.'
                && prev.is_some_and(|p| p.is_ascii_digit())
                && next.is_some_and(|n| n.is_ascii_digit());
            let at_end = match next {
                None => true,
                Some(n) => n.is_whitespace() || is_closer(n) || is_wide_terminal(c),
            };

            if at_end && !decimal {
                while let Some(&n) = chars.peek() {
                    if is_closer(n) || is_terminal(n) {
                        current.push(n);
                        chars.next();
                    } else {
                        break;
                    }
                }
                push_trimmed(&mut sentences, &mut current);
            }
        }
        prev = Some(c);
    }
    push_trimmed(&mut sentences, &mut current);
    sentences
}

/// Break a sentence into whitespace-delimited windows of at most `max_chars`.
fn split_words(sentence: &str, max_chars: usize) -> Vec<String> {
    if char_len(sentence) <= max_chars {
        return vec![sentence.to_string()];
    }

    let mut windows = Vec::new();
    let mut current = String::new();
    for word in sentence.split_whitespace() {
        if current.is_empty() {
            current.push_str(word);
        } else if char_len(&current) + 1 + char_len(word) <= max_chars {
            current.push(' ');
            current.push_str(word);
        } else {
            windows.push(std::mem::take(&mut current));
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        windows.push(current);
    }
    windows
}

fn push_trimmed(out: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
    current.clear();
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '…') || is_wide_terminal(c)
}

fn is_wide_terminal(c: char) -> bool {
    matches!(c, '。' | '！' | '？')
}

fn is_closer(c: char) -> bool {
    matches!(c, '"' | '\'' | ')' | ']' | '\u{201d}' | '\u{2019}' | '」')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_basic_sentences() {
        assert_eq!(
            split_sentences("Hello world! How are you? I'm fine."),
            vec!["Hello world!", "How are you?", "I'm fine."]
        );
    }

    #[test]
    fn keeps_decimals_and_closing_quotes() {
        assert_eq!(
            split_sentences("Version 2.5 shipped. He said \"Done!\" Then left"),
            vec!["Version 2.5 shipped.", "He said \"Done!\"", "Then left"]
        );
    }

    #[test]
    fn groups_repeated_punctuation() {
        assert_eq!(split_sentences("What?! Really..."), vec!["What?!", "Really..."]);
    }

    #[test]
    fn splits_cjk_terminators_without_spaces() {
        assert_eq!(split_sentences("你好。再见！"), vec!["你好。", "再见！"]);
    }

    #[test]
    fn normalizes_like_the_tokenizer_front_end() {
        assert_eq!(normalize_chunk("  hello   world "), "Hello world.");
        assert_eq!(normalize_chunk("already done!"), "Already done!");
        assert_eq!(normalize_chunk("élan vital"), "Élan vital.");
    }

    #[test]
    fn rejects_empty_and_blank_text() {
        assert!(matches!(prepare_chunks("", 100), Err(TtsError::EmptyText)));
        assert!(matches!(prepare_chunks(" \n\t ", 100), Err(TtsError::EmptyText)));
    }

    #[test]
    fn packs_short_sentences_together() {
        let chunks = prepare_chunks("One. Two. Three.", 100).unwrap();
        assert_eq!(chunks, vec!["One. Two. Three."]);

        let chunks = prepare_chunks("First sentence here. Second one follows.", 24).unwrap();
        assert_eq!(chunks, vec!["First sentence here.", "Second one follows."]);
    }

    #[test]
    fn never_splits_inside_a_word() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda";
        let chunks = prepare_chunks(text, 20).unwrap();
        assert!(chunks.len() > 1);

        let words: Vec<&str> = text.split_whitespace().collect();
        let rejoined: Vec<String> = chunks
            .iter()
            .flat_map(|c| c.split_whitespace())
            .map(|w| w.trim_end_matches('.').to_lowercase())
            .collect();
        assert_eq!(rejoined, words);
        for chunk in &chunks {
            // +1 for the period normalization may add.
            assert!(chunk.chars().count() <= 21, "chunk too long: {chunk:?}");
        }
    }

    #[test]
    fn oversized_word_becomes_its_own_chunk() {
        let word = "x".repeat(40);
        let chunks = prepare_chunks(&format!("a {word} b"), 16).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].trim_end_matches('.').to_lowercase(), word);
    }
}
