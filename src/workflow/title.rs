//! Issue title/description derived from a free-text prompt.

const MAX_TITLE_CHARS: usize = 50;

const FILLER_PREFIXES: &[&str] = &["we need to", "please", "can you"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleSplit {
    pub title: String,
    pub description: String,
}

/// Strip leading filler phrases ("please", "can you", ...), case-insensitively.
fn strip_filler(text: &str) -> &str {
    let mut rest = text.trim_start();
    loop {
        let stripped = FILLER_PREFIXES.iter().find_map(|prefix| {
            let head = rest.get(..prefix.len())?;
            if !head.eq_ignore_ascii_case(prefix) {
                return None;
            }
            let tail = &rest[prefix.len()..];
            // Only whole words: "pleased" is not "please".
            match tail.chars().next() {
                None => Some(tail),
                Some(c) if c.is_whitespace() || c == ',' => {
                    Some(tail.trim_start_matches(|c: char| c.is_whitespace() || c == ','))
                }
                Some(_) => None,
            }
        });
        match stripped {
            Some(tail) => rest = tail,
            None => return rest,
        }
    }
}

/// Split a prompt into an issue title and description.
///
/// With a period, the title is the text before the first period and the
/// description is the rest. Without one, filler lead-ins are dropped, the
/// first 50 characters become the title, and the whole prompt is kept as
/// the description. A prompt that is nothing but filler keeps its own text
/// as the title.
pub fn split_title(prompt: &str) -> TitleSplit {
    let prompt = prompt.trim();

    if let Some((head, tail)) = prompt.split_once('.') {
        let title = head.trim();
        if !title.is_empty() {
            return TitleSplit {
                title: title.to_string(),
                description: tail.trim().to_string(),
            };
        }
    }

    let stripped = strip_filler(prompt).trim();
    let source = if stripped.is_empty() { prompt } else { stripped };
    let title: String = source.chars().take(MAX_TITLE_CHARS).collect();
    TitleSplit {
        title: title.trim_end().to_string(),
        description: prompt.to_string(),
    }
}
