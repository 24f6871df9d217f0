use crate::model::{Dataset, EffectiveFields, Record, RelaySettings, Template};
use crate::overrides::OverrideStore;
use crate::render::render;

/// The recipient address: first column named "email", any case.
pub fn recipient(record: &Record) -> String {
    record
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("email"))
        .map(|(_, v)| v.clone())
        .unwrap_or_default()
}

fn render_opt(text: Option<&str>, record: &Record) -> String {
    render(text.unwrap_or_default(), record)
}

/// Final field values for record `index`. Preview and dispatch both go through here.
pub fn resolve(
    index: usize,
    dataset: &Dataset,
    template: &Template,
    relay: &RelaySettings,
    overrides: &OverrideStore,
) -> EffectiveFields {
    let Some(record) = dataset.get(index) else {
        return EffectiveFields::default();
    };

    let from_email = match template.from_email_override.as_deref() {
        Some(addr) if !addr.is_empty() => addr.to_string(),
        _ => relay.from_email.clone(),
    };

    let patch = overrides.get(index);
    EffectiveFields {
        to: patch.to.unwrap_or_else(|| recipient(record)),
        from_name: patch
            .from_name
            .unwrap_or_else(|| render_opt(template.from_name.as_deref(), record)),
        from_email: patch.from_email.unwrap_or(from_email),
        subject: patch
            .subject
            .unwrap_or_else(|| render(&template.subject, record)),
        body: patch.body.unwrap_or_else(|| render(&template.body, record)),
        cc: patch
            .cc
            .unwrap_or_else(|| render_opt(template.cc.as_deref(), record)),
        bcc: patch
            .bcc
            .unwrap_or_else(|| render_opt(template.bcc.as_deref(), record)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OverrideField;

    fn record(pairs: &[(&str, &str)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn fixture() -> (Dataset, Template, RelaySettings) {
        let ds = Dataset::new(vec![
            record(&[("Name", "Ann"), ("EMAIL", "ann@x.com"), ("team", "ops")]),
            record(&[("Name", "Bob")]),
        ]);
        let template = Template {
            subject: "Hi {{Name}}".into(),
            body: "<p>Team {{team}}</p>".into(),
            from_name: Some("{{team}} desk".into()),
            cc: Some("{{team}}@x.com".into()),
            ..Default::default()
        };
        let relay = RelaySettings {
            from_email: "relay@x.com".into(),
            ..Default::default()
        };
        (ds, template, relay)
    }

    #[test]
    fn test_computed_fields() {
        let (ds, template, relay) = fixture();
        let fields = resolve(0, &ds, &template, &relay, &OverrideStore::default());
        assert_eq!(fields.to, "ann@x.com");
        assert_eq!(fields.from_name, "ops desk");
        assert_eq!(fields.from_email, "relay@x.com");
        assert_eq!(fields.subject, "Hi Ann");
        assert_eq!(fields.body, "<p>Team ops</p>");
        assert_eq!(fields.cc, "ops@x.com");
        assert_eq!(fields.bcc, "");
    }

    #[test]
    fn test_missing_email_column_yields_empty_to() {
        let (ds, template, relay) = fixture();
        let fields = resolve(1, &ds, &template, &relay, &OverrideStore::default());
        assert_eq!(fields.to, "");
        assert_eq!(fields.body, "<p>Team {{team}}</p>");
    }

    #[test]
    fn test_from_email_override_wins_when_non_empty() {
        let (ds, mut template, relay) = fixture();
        template.from_email_override = Some(String::new());
        let fields = resolve(0, &ds, &template, &relay, &OverrideStore::default());
        assert_eq!(fields.from_email, "relay@x.com");

        template.from_email_override = Some("tpl@x.com".into());
        let fields = resolve(0, &ds, &template, &relay, &OverrideStore::default());
        assert_eq!(fields.from_email, "tpl@x.com");
    }

    #[test]
    fn test_override_wins_including_blank() {
        let (ds, template, relay) = fixture();
        let mut overrides = OverrideStore::default();
        overrides.set(0, OverrideField::Subject, "Custom");
        overrides.set(0, OverrideField::Cc, "");
        let fields = resolve(0, &ds, &template, &relay, &overrides);
        assert_eq!(fields.subject, "Custom");
        assert_eq!(fields.cc, "");
        assert_eq!(fields.to, "ann@x.com");

        let other = resolve(1, &ds, &template, &relay, &overrides);
        assert_eq!(other.subject, "Hi Bob");
    }

    #[test]
    fn test_reset_restores_computed_output() {
        let (ds, template, relay) = fixture();
        let mut overrides = OverrideStore::default();
        let baseline = resolve(0, &ds, &template, &relay, &overrides);
        assert_eq!(baseline, resolve(0, &ds, &template, &relay, &overrides));

        overrides.set(0, OverrideField::Body, "edited");
        overrides.set(0, OverrideField::To, "other@x.com");
        assert_ne!(baseline, resolve(0, &ds, &template, &relay, &overrides));

        overrides.reset(0);
        assert_eq!(baseline, resolve(0, &ds, &template, &relay, &overrides));
    }

    #[test]
    fn test_out_of_range_index_is_blank() {
        let (ds, template, relay) = fixture();
        let fields = resolve(9, &ds, &template, &relay, &OverrideStore::default());
        assert_eq!(fields, EffectiveFields::default());
    }
}
