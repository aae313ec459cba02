//! Case conversions for module, business and column names.

/// The four spellings templates need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameForms {
    pub pascal: String,
    pub camel: String,
    pub kebab: String,
    pub snake: String,
}

impl NameForms {
    pub fn new(raw: &str) -> Self {
        let words = split_words(raw);
        let pascal: String = words.iter().map(|w| capitalize(w)).collect();
        let camel = match words.split_first() {
            Some((first, rest)) => {
                let mut s = first.clone();
                s.extend(rest.iter().map(|w| capitalize(w)));
                s
            }
            None => String::new(),
        };
        Self {
            pascal,
            camel,
            kebab: words.join("-"),
            snake: words.join("_"),
        }
    }

    /// Usable as a TypeScript identifier and a path segment.
    pub fn is_identifier(&self) -> bool {
        self.pascal
            .chars()
            .next()
            .map_or(false, |c| c.is_ascii_alphabetic())
    }
}

/// Lower-cased words of `user_profile`, `userProfile`, `HTTPServer`, `sys-dict`.
pub fn split_words(raw: &str) -> Vec<String> {
    let chars: Vec<char> = raw.chars().collect();
    let mut words = Vec::new();
    let mut current = String::new();

    for (i, &ch) in chars.iter().enumerate() {
        if !ch.is_ascii_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }

        if ch.is_ascii_uppercase() && !current.is_empty() {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).map_or(false, |c| c.is_ascii_lowercase());
            if prev.is_ascii_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_ascii_uppercase() && next_is_lower)
            {
                words.push(std::mem::take(&mut current));
            }
        }
        current.push(ch.to_ascii_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_words() {
        assert_eq!(split_words("sys_user"), vec!["sys", "user"]);
        assert_eq!(split_words("userProfile"), vec!["user", "profile"]);
        assert_eq!(split_words("HTTPServer"), vec!["http", "server"]);
        assert_eq!(split_words("order-item v2"), vec!["order", "item", "v2"]);
        assert!(split_words("__").is_empty());
    }

    #[test]
    fn test_forms() {
        let n = NameForms::new("sys_dict_type");
        assert_eq!(n.pascal, "SysDictType");
        assert_eq!(n.camel, "sysDictType");
        assert_eq!(n.kebab, "sys-dict-type");
        assert_eq!(n.snake, "sys_dict_type");
        assert!(n.is_identifier());

        assert!(!NameForms::new("9lives").is_identifier());
        assert!(!NameForms::new("").is_identifier());
    }
}
