//! `@key` / `@key=value` tokens embedded in shader comments.

/// A single annotation. Key and value are lowercased.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub key: String,
    pub value: Option<String>,
}

impl Annotation {
    /// The value parsed as a number, if it is one.
    pub fn number(&self) -> Option<f32> {
        self.value.as_deref().and_then(|v| v.parse::<f32>().ok())
    }
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_value_char(c: char) -> bool {
    !c.is_whitespace() && c != ',' && c != ';'
}

/// Splits a comment body into its annotations and the remaining text.
///
/// A token starts with `@` that is not preceded by an alphanumeric
/// character (so e-mail addresses stay intact). The token and one
/// whitespace character after it are removed; what remains, trimmed, is the
/// comment's description.
pub fn extract(body: &str) -> (Vec<Annotation>, String) {
    let body = body.strip_prefix('!').unwrap_or(body);
    let chars: Vec<char> = body.chars().collect();
    let mut annotations = Vec::new();
    let mut rest = String::with_capacity(body.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let at_token = c == '@'
            && (i == 0 || !chars[i - 1].is_alphanumeric())
            && chars.get(i + 1).copied().is_some_and(is_key_char);
        if !at_token {
            rest.push(c);
            i += 1;
            continue;
        }

        let mut j = i + 1;
        while j < chars.len() && is_key_char(chars[j]) {
            j += 1;
        }
        let key: String = chars[i + 1..j].iter().collect::<String>().to_lowercase();
        let mut value = None;
        if chars.get(j) == Some(&'=') {
            let v_start = j + 1;
            j = v_start;
            while j < chars.len() && is_value_char(chars[j]) {
                j += 1;
            }
            value = Some(chars[v_start..j].iter().collect::<String>().to_lowercase());
        }
        if chars.get(j).is_some_and(|c| c.is_whitespace()) {
            j += 1;
        }
        annotations.push(Annotation { key, value });
        i = j;
    }
    (annotations, rest.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ann(key: &str, value: Option<&str>) -> Annotation {
        Annotation {
            key: key.to_string(),
            value: value.map(str::to_string),
        }
    }

    #[test]
    fn test_extracts_tokens_and_description() {
        let (anns, desc) = extract(" Blur radius @min=0 @MAX=25.5 @unit=px");
        assert_eq!(
            anns,
            vec![ann("min", Some("0")), ann("max", Some("25.5")), ann("unit", Some("px"))]
        );
        assert_eq!(desc, "Blur radius");
    }

    #[test]
    fn test_flag_tokens_without_value() {
        let (anns, desc) = extract(" @color key color");
        assert_eq!(anns, vec![ann("color", None)]);
        assert_eq!(desc, "key color");
    }

    #[test]
    fn test_doxygen_marker_and_email() {
        let (anns, desc) = extract("! mail me@example.com @int");
        assert_eq!(anns, vec![ann("int", None)]);
        assert_eq!(desc, "mail me@example.com");
    }

    #[test]
    fn test_numeric_values() {
        let (anns, _) = extract("@min=-1.5 @max=abc");
        assert_eq!(anns[0].number(), Some(-1.5));
        assert_eq!(anns[1].number(), None);
    }

    #[test]
    fn test_lone_at_sign_is_text() {
        let (anns, desc) = extract(" price @ 5");
        assert!(anns.is_empty());
        assert_eq!(desc, "price @ 5");
    }
}
