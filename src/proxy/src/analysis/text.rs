use regex::{Regex, RegexBuilder};

/// Converts a MySQL LIKE pattern into an anchored regular expression.
/// `%` matches any run of characters, `_` any single character; `\%` and
/// `\_` are the literal characters. Everything regex-special is quoted.
pub fn mysql_pattern_to_regex(pattern: &str) -> Option<Regex> {
    let mut translated = String::with_capacity(pattern.len() + 8);
    translated.push('^');

    let mut last_was_escape = false;
    for c in pattern.chars() {
        match c {
            '\\' => {
                if last_was_escape {
                    translated.push_str("\\\\");
                    last_was_escape = false;
                } else {
                    last_was_escape = true;
                }
            }
            '_' => {
                if last_was_escape {
                    translated.push('_');
                } else {
                    translated.push('.');
                }
                last_was_escape = false;
            }
            '%' => {
                if last_was_escape {
                    translated.push('%');
                } else {
                    translated.push_str(".*");
                }
                last_was_escape = false;
            }
            '.' | ',' | '?' | '*' | '[' | ']' | '|' | '^' | '$' | '+' | '(' | ')' | '{' | '}' => {
                translated.push('\\');
                translated.push(c);
                last_was_escape = false;
            }
            other => {
                translated.push(other);
                last_was_escape = false;
            }
        }
    }
    translated.push('$');

    // LIKE is case-insensitive under the default collation.
    RegexBuilder::new(&translated)
        .case_insensitive(true)
        .build()
        .ok()
}

/// True when the pattern matches every string, e.g. `%` or `%%`; a LIKE
/// against such a pattern is a tautology no matter what the left side is.
pub fn is_tautological_pattern(pattern: &str) -> bool {
    !pattern.is_empty() && pattern.chars().all(|c| c == '%')
}

fn soundex_class(c: u8) -> u8 {
    match c.to_ascii_lowercase() {
        b'b' | b'f' | b'p' | b'v' => 1,
        b'c' | b'g' | b'j' | b'k' | b'q' | b's' | b'x' | b'z' => 2,
        b'd' | b't' => 3,
        b'l' => 4,
        b'm' | b'n' => 5,
        b'r' => 6,
        _ => 0,
    }
}

/// MySQL's SOUNDEX: keep the first letter, drop vowels and h/w/y, map the
/// rest to digit classes, collapse runs that were adjacent in the original
/// word (h and w are transparent for adjacency), and zero-pad to four
/// characters.
pub fn soundex(word: &str) -> String {
    let letters: Vec<u8> = word
        .bytes()
        .filter(|b| b.is_ascii_alphabetic())
        .collect();
    let Some(&first) = letters.first() else {
        return String::new();
    };

    let mut code = String::new();
    code.push(first.to_ascii_uppercase() as char);

    let mut last_class = soundex_class(first);
    for &letter in &letters[1..] {
        let lower = letter.to_ascii_lowercase();
        // h and w are transparent: the letters on either side of them count
        // as adjacent. Vowels and y separate.
        if lower == b'h' || lower == b'w' {
            continue;
        }
        let class = soundex_class(letter);
        if class != 0 && class != last_class {
            code.push((b'0' + class) as char);
        }
        last_class = class;
    }

    while code.len() < 4 {
        code.push('0');
    }
    code
}
