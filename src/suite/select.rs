//! Test selection by glob pattern

use globset::{Glob, GlobSet, GlobSetBuilder};

/// Selected test names. An empty selection selects everything.
#[derive(Debug, Clone)]
pub struct TestSelection {
    glob_set: Option<GlobSet>,
}

impl TestSelection {
    pub fn all() -> Self {
        Self { glob_set: None }
    }

    pub fn from_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self, globset::Error> {
        let patterns: Vec<&str> = patterns
            .iter()
            .map(|p| p.as_ref().trim())
            .filter(|p| !p.is_empty())
            .collect();
        if patterns.is_empty() {
            return Ok(Self::all());
        }

        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(Glob::new(pattern)?);
        }
        Ok(Self {
            glob_set: Some(builder.build()?),
        })
    }

    pub fn is_selected(&self, test_name: &str) -> bool {
        match &self.glob_set {
            None => true,
            Some(set) => set.is_match(test_name),
        }
    }
}

impl Default for TestSelection {
    fn default() -> Self {
        Self::all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_selects_everything() {
        let selection = TestSelection::from_patterns::<&str>(&[]).unwrap();
        assert!(selection.is_selected("anything.py"));
        assert!(TestSelection::from_patterns(&["  "]).unwrap().is_selected("x"));
    }

    #[test]
    fn test_patterns_match_test_names() {
        let selection = TestSelection::from_patterns(&["mo_*", "handover.sh"]).unwrap();
        assert!(selection.is_selected("mo_mt_sms.sh"));
        assert!(selection.is_selected("handover.sh"));
        assert!(!selection.is_selected("ussd.sh"));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(TestSelection::from_patterns(&["[unclosed"]).is_err());
    }
}
