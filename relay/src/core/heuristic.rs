//! Opt-in paragraph split for processes that never emit typed thinking blocks.
//!
//! Only used when the turn produced no thinking text of its own. Everything
//! before the last blank-line-separated paragraph is treated as thinking.

/// Split `text` into `(thinking, answer)`.
///
/// Returns `None` when the text has fewer than two non-empty paragraphs.
pub fn split_paragraphs(text: &str) -> Option<(String, String)> {
    let normalized = text.replace("\r\n", "\n");
    let paragraphs: Vec<&str> = normalized
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    let (answer, thinking) = paragraphs.split_last()?;
    if thinking.is_empty() {
        return None;
    }
    Some((thinking.join("\n\n"), (*answer).to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_paragraph_is_untouched() {
        assert_eq!(split_paragraphs("just an answer\nwith two lines"), None);
        assert_eq!(split_paragraphs("\n\n  \n\n"), None);
    }

    #[test]
    fn last_paragraph_becomes_answer() {
        let (thinking, answer) =
            split_paragraphs("Let me check.\n\nThe file has 3 lines.\n\n\nAnswer: 3").expect("split");
        assert_eq!(thinking, "Let me check.\n\nThe file has 3 lines.");
        assert_eq!(answer, "Answer: 3");
    }

    #[test]
    fn crlf_paragraphs_are_recognized() {
        let (thinking, answer) = split_paragraphs("a\r\n\r\nb").expect("split");
        assert_eq!(thinking, "a");
        assert_eq!(answer, "b");
    }
}
