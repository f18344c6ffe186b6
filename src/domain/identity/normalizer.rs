use std::fmt::Debug;

/// Produces canonical lookup keys for names and emails. Total: absent in, absent out.
pub trait LookupNormalizer: Send + Sync + Debug {
    fn normalize_name(&self, name: &str) -> String;

    fn normalize_email(&self, email: &str) -> String;

    fn normalize_names(&self, names: &[Option<&str>]) -> Vec<Option<String>> {
        names
            .iter()
            .map(|name| name.map(|n| self.normalize_name(n)))
            .collect()
    }

    fn normalize_emails(&self, emails: &[Option<&str>]) -> Vec<Option<String>> {
        emails
            .iter()
            .map(|email| email.map(|e| self.normalize_email(e)))
            .collect()
    }
}

/// Upper-cases keys using Unicode case mapping
#[derive(Debug, Clone, Copy, Default)]
pub struct UpperInvariantLookupNormalizer;

impl LookupNormalizer for UpperInvariantLookupNormalizer {
    fn normalize_name(&self, name: &str) -> String {
        name.to_uppercase()
    }

    fn normalize_email(&self, email: &str) -> String {
        email.to_uppercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalizes_to_upper_case() {
        let normalizer = UpperInvariantLookupNormalizer;

        assert_eq!(normalizer.normalize_name("alice"), "ALICE");
        assert_eq!(normalizer.normalize_email("Alice@Example.com"), "ALICE@EXAMPLE.COM");
        assert_eq!(normalizer.normalize_name("straße"), "STRASSE");
    }

    #[test]
    fn test_batch_normalization_is_total() {
        let normalizer = UpperInvariantLookupNormalizer;

        let normalized = normalizer.normalize_names(&[Some("bob"), None, Some("eve")]);
        assert_eq!(
            normalized,
            vec![Some("BOB".to_string()), None, Some("EVE".to_string())]
        );
    }
}
