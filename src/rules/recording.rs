use crate::{Labels, METRIC_NAME_LABEL, Vector};

pub struct RecordingRule {
    name: String,
    expr: String,
    labels: Labels,
}

impl RecordingRule {
    pub fn new(name: impl Into<String>, expr: impl Into<String>, labels: Labels) -> Self {
        Self {
            name: name.into(),
            expr: expr.into(),
            labels,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// Rename every sample to the rule name and apply the rule labels.
    ///
    /// An empty rule label value removes the label.
    pub fn apply(&self, mut vector: Vector) -> Vector {
        for sample in &mut vector {
            sample.metric.set(METRIC_NAME_LABEL, self.name.clone());
            for label in self.labels.iter() {
                if label.value.is_empty() {
                    sample.metric.remove(&label.name);
                } else {
                    sample.metric.set(label.name.clone(), label.value.clone());
                }
            }
        }
        vector
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Sample;
    use chrono::Utc;

    #[test]
    fn test_apply() {
        let rule = RecordingRule::new(
            "job:up:sum",
            "sum by (job) (up)",
            Labels::from_pairs([("team", "infra"), ("instance", "")]),
        );
        let vector = vec![Sample {
            metric: Labels::from_pairs([("job", "node"), ("instance", "a")]),
            timestamp: Utc::now(),
            value: 3.0,
        }];

        let recorded = rule.apply(vector);
        assert_eq!(
            recorded[0].metric,
            Labels::from_pairs([("__name__", "job:up:sum"), ("job", "node"), ("team", "infra")])
        );
        assert_eq!(recorded[0].value, 3.0);
    }
}
