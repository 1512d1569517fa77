//! Split text into the word-like units BPE merges within.
//!
//! Mirrors the GPT-2 pattern
//! `'s|'t|'re|'ve|'m|'ll|'d| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+(?!\S)|\s+`:
//! a single space is glued to the word that follows it, and a longer
//! whitespace run gives its last character to the next unit.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Letter,
    Number,
    Space,
    Other,
}

fn class(c: char) -> CharClass {
    if c.is_whitespace() {
        CharClass::Space
    } else if c.is_alphabetic() {
        CharClass::Letter
    } else if c.is_numeric() {
        CharClass::Number
    } else {
        CharClass::Other
    }
}

/// Length in chars of a contraction suffix right after an apostrophe.
fn contraction_len(rest: &[(usize, char)]) -> Option<usize> {
    let next = |i: usize| rest.get(i).map(|&(_, c)| c);
    match (next(0), next(1)) {
        (Some('r'), Some('e')) | (Some('v'), Some('e')) | (Some('l'), Some('l')) => Some(2),
        (Some('s' | 't' | 'm' | 'd'), _) => Some(1),
        _ => None,
    }
}

/// Split `text` into consecutive units. Concatenating the units gives back
/// `text` exactly.
pub(crate) fn split_words(text: &str) -> Vec<&str> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let n = chars.len();
    let offset = |i: usize| if i < n { chars[i].0 } else { text.len() };

    let mut units = Vec::new();
    let mut i = 0;
    while i < n {
        let start = i;
        let c = chars[i].1;

        if c == '\'' {
            if let Some(len) = contraction_len(&chars[i + 1..]) {
                i += 1 + len;
                units.push(&text[offset(start)..offset(i)]);
                continue;
            }
        }

        let head = if c == ' ' && i + 1 < n && class(chars[i + 1].1) != CharClass::Space {
            i + 1
        } else {
            i
        };
        let head_class = class(chars[head].1);

        let mut end = head + 1;
        while end < n && class(chars[end].1) == head_class {
            end += 1;
        }
        if head_class == CharClass::Space && end < n && end - start > 1 {
            end -= 1;
        }

        i = end;
        units.push(&text[offset(start)..offset(i)]);
    }
    units
}
