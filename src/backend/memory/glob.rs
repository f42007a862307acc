//! Glob Matching
//!
//! Redis-style key patterns: `*`, `?`, `[abc]`, `[^abc]`, `[a-z]` and `\`
//! escapes.

/// Returns true when `text` matches the glob `pattern`.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut pi, mut ti) = (0, 0);
    // Pattern index after the last `*`, and the text index it currently covers up to.
    let mut star: Option<(usize, usize)> = None;

    while ti < text.len() {
        let advanced = if pi < pattern.len() {
            match pattern[pi] {
                '*' => {
                    star = Some((pi + 1, ti));
                    pi += 1;
                    continue;
                }
                '?' => Some(pi + 1),
                '[' => match_class(&pattern, pi, text[ti]),
                '\\' if pi + 1 < pattern.len() => (pattern[pi + 1] == text[ti]).then_some(pi + 2),
                c => (c == text[ti]).then_some(pi + 1),
            }
        } else {
            None
        };

        match (advanced, star) {
            (Some(next), _) => {
                pi = next;
                ti += 1;
            }
            (None, Some((after_star, covered))) => {
                pi = after_star;
                ti = covered + 1;
                star = Some((after_star, covered + 1));
            }
            (None, None) => return false,
        }
    }

    while pi < pattern.len() && pattern[pi] == '*' {
        pi += 1;
    }
    pi == pattern.len()
}

/// Matches `c` against the class opening at `start`.
///
/// Returns the pattern index after the class when it matches. An unterminated
/// class runs to the end of the pattern.
fn match_class(pattern: &[char], start: usize, c: char) -> Option<usize> {
    let mut i = start + 1;
    let negate = pattern.get(i) == Some(&'^');
    if negate {
        i += 1;
    }

    let mut matched = false;
    while i < pattern.len() && pattern[i] != ']' {
        if pattern[i] == '\\' && i + 1 < pattern.len() {
            matched |= pattern[i + 1] == c;
            i += 2;
        } else if i + 2 < pattern.len() && pattern[i + 1] == '-' && pattern[i + 2] != ']' {
            let (mut low, mut high) = (pattern[i], pattern[i + 2]);
            if low > high {
                std::mem::swap(&mut low, &mut high);
            }
            matched |= (low..=high).contains(&c);
            i += 3;
        } else {
            matched |= pattern[i] == c;
            i += 1;
        }
    }

    let end = if i < pattern.len() { i + 1 } else { i };
    (matched != negate).then_some(end)
}
