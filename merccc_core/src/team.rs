// Teams and recorded scores.
//
// A `Team`'s identity is its externally assigned number. Name, institution,
// and logo reference never change after load. Score history is a vector of
// `Option<Score>`: a discarded attempt leaves a `None` hole so the attempt
// numbering visible on the wire (`scoreIndex`) stays stable across discards.
//
// The tiebreaker orders teams that are not classified. The original data
// model used a sentinel extreme value for "unset"; here it is an `Option`,
// with `None` sorting after every real value.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use merccc_protocol::TeamNumber;

use crate::formula::Formula;

/// One scoring attempt: field values plus the derived total. Immutable once
/// completed.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Score {
    values: BTreeMap<String, f64>,
    total: f64,
    completed: bool,
}

impl Score {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a completed score from wire data (snapshot or event row).
    pub fn from_row(keys: &[String], values: &[f64], total: f64) -> Self {
        let values = keys
            .iter()
            .cloned()
            .zip(values.iter().copied())
            .collect();
        Score {
            values,
            total,
            completed: true,
        }
    }

    /// Set one field value. No-op on a completed score.
    pub fn set_field(&mut self, key: &str, value: f64) {
        if !self.completed {
            self.values.insert(key.to_string(), value);
        }
    }

    /// Derive the total and freeze the score.
    pub fn complete(&mut self, formula: &Formula) -> f64 {
        self.total = formula.evaluate(&self.values);
        self.completed = true;
        self.total
    }

    pub fn values(&self) -> &BTreeMap<String, f64> {
        &self.values
    }

    /// Field values in the given key order (defaulting absent keys to 0).
    pub fn row(&self, keys: &[String]) -> Vec<f64> {
        keys.iter()
            .map(|key| self.values.get(key).copied().unwrap_or(0.0))
            .collect()
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn completed(&self) -> bool {
        self.completed
    }
}

/// One competing team and its recorded history.
#[derive(Clone, Debug)]
pub struct Team {
    pub number: TeamNumber,
    pub name: String,
    pub institution: String,
    pub logo: String,
    scores: Vec<Option<Score>>,
    annotations: BTreeSet<String>,
    tiebreaker: Option<f64>,
}

impl Team {
    pub fn new(number: TeamNumber, name: String, institution: String, logo: String) -> Self {
        Team {
            number,
            name,
            institution,
            logo,
            scores: Vec::new(),
            annotations: BTreeSet::new(),
            tiebreaker: None,
        }
    }

    /// Recorded attempts, holes included.
    pub fn scores(&self) -> &[Option<Score>] {
        &self.scores
    }

    pub fn push_score(&mut self, score: Score) -> usize {
        self.scores.push(Some(score));
        self.scores.len() - 1
    }

    /// Record a discarded attempt so later indices stay stable.
    pub fn push_hole(&mut self) {
        self.scores.push(None);
    }

    /// Replace the record at `index`. Returns false if the index is out of
    /// range.
    pub fn replace_score(&mut self, index: usize, score: Score) -> bool {
        match self.scores.get_mut(index) {
            Some(slot) => {
                *slot = Some(score);
                true
            }
            None => false,
        }
    }

    /// Null out the record at `index`, leaving a hole.
    pub fn expunge_score(&mut self, index: usize) -> bool {
        match self.scores.get_mut(index) {
            Some(slot) => {
                *slot = None;
                true
            }
            None => false,
        }
    }

    pub fn clear_scores(&mut self) {
        self.scores.clear();
    }

    /// Best completed total under the global sort order (`descending` means
    /// higher is better).
    pub fn best_score(&self, descending: bool) -> Option<f64> {
        let totals = self
            .scores
            .iter()
            .flatten()
            .filter(|s| s.completed())
            .map(Score::total);
        if descending {
            totals.fold(None, |best: Option<f64>, t| {
                Some(best.map_or(t, |b| b.max(t)))
            })
        } else {
            totals.fold(None, |best: Option<f64>, t| {
                Some(best.map_or(t, |b| b.min(t)))
            })
        }
    }

    pub fn annotations(&self) -> &BTreeSet<String> {
        &self.annotations
    }

    pub fn add_annotation(&mut self, text: &str) -> bool {
        self.annotations.insert(text.to_string())
    }

    pub fn remove_annotation(&mut self, text: &str) -> bool {
        self.annotations.remove(text)
    }

    pub fn clear_annotations(&mut self) {
        self.annotations.clear();
    }

    pub fn tiebreaker(&self) -> Option<f64> {
        self.tiebreaker
    }

    pub fn set_tiebreaker(&mut self, value: f64) {
        self.tiebreaker = Some(value);
    }

    /// Tiebreaker used for ordering unclassified teams: the assigned value,
    /// else the best score if any attempt completed.
    pub fn effective_tiebreaker(&self, descending: bool) -> Option<f64> {
        self.tiebreaker.or_else(|| self.best_score(descending))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldSpec;

    fn formula() -> Formula {
        let fields = vec![
            FieldSpec {
                key: "gates".into(),
                default: 0.0,
            },
            FieldSpec {
                key: "bonus".into(),
                default: 0.0,
            },
        ];
        Formula::compile(
            &["gates".into(), "10".into(), "*".into(), "bonus".into(), "+".into()],
            &fields,
        )
        .unwrap()
    }

    fn team() -> Team {
        Team::new(TeamNumber(7), "Alpha".into(), "North".into(), "7.png".into())
    }

    #[test]
    fn completed_score_is_frozen() {
        let mut score = Score::new();
        score.set_field("gates", 3.0);
        let total = score.complete(&formula());
        assert_eq!(total, 30.0);
        assert!(score.completed());

        score.set_field("gates", 9.0);
        assert_eq!(score.values().get("gates"), Some(&3.0));
    }

    #[test]
    fn discard_leaves_hole_and_stable_indices() {
        let mut team = team();
        let mut first = Score::new();
        first.set_field("gates", 1.0);
        first.complete(&formula());
        assert_eq!(team.push_score(first), 0);

        team.push_hole();

        let mut third = Score::new();
        third.set_field("gates", 2.0);
        third.complete(&formula());
        assert_eq!(team.push_score(third), 2);

        assert_eq!(team.scores().len(), 3);
        assert!(team.scores()[1].is_none());
    }

    #[test]
    fn best_score_follows_sort_order() {
        let mut team = team();
        for gates in [1.0, 3.0, 2.0] {
            let mut score = Score::new();
            score.set_field("gates", gates);
            score.complete(&formula());
            team.push_score(score);
        }
        assert_eq!(team.best_score(true), Some(30.0));
        assert_eq!(team.best_score(false), Some(10.0));
    }

    #[test]
    fn best_score_ignores_holes_and_empty_history() {
        let mut team = team();
        assert_eq!(team.best_score(true), None);
        team.push_hole();
        assert_eq!(team.best_score(true), None);
    }

    #[test]
    fn effective_tiebreaker_prefers_assigned_value() {
        let mut team = team();
        assert_eq!(team.effective_tiebreaker(true), None);

        let mut score = Score::new();
        score.set_field("gates", 2.0);
        score.complete(&formula());
        team.push_score(score);
        assert_eq!(team.effective_tiebreaker(true), Some(20.0));

        team.set_tiebreaker(5.0);
        assert_eq!(team.effective_tiebreaker(true), Some(5.0));
    }
}
