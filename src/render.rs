use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::model::Record;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([^}]+)\}\}").expect("placeholder pattern is valid"));

/// Substitutes `{{key}}` placeholders from `record`.
///
/// Keys are trimmed. Unknown keys are left in place verbatim; values are not escaped.
pub fn render(text: &str, record: &Record) -> String {
    if text.is_empty() {
        return String::new();
    }
    PLACEHOLDER
        .replace_all(text, |caps: &Captures| match record.get(caps[1].trim()) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, &str)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_replaces_every_occurrence() {
        let r = record(&[("name", "Ann")]);
        assert_eq!(render("{{name}} and {{ name }}!", &r), "Ann and Ann!");
    }

    #[test]
    fn test_unknown_key_passes_through() {
        let r = record(&[("name", "Ann")]);
        assert_eq!(render("Hi {{ nick }}, {{name}}", &r), "Hi {{ nick }}, Ann");
    }

    #[test]
    fn test_empty_value_still_substituted() {
        let r = record(&[("title", "")]);
        assert_eq!(render("[{{title}}]", &r), "[]");
    }

    #[test]
    fn test_empty_and_plain_text() {
        let r = record(&[("a", "1")]);
        assert_eq!(render("", &r), "");
        assert_eq!(render("no placeholders", &r), "no placeholders");
        assert_eq!(render("{{}} {{a}", &r), "{{}} {{a}");
    }

    #[test]
    fn test_no_html_escaping() {
        let r = record(&[("link", "<a href=\"x\">x</a>")]);
        assert_eq!(render("<p>{{link}}</p>", &r), "<p><a href=\"x\">x</a></p>");
    }
}
