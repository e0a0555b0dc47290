use rowmesh_core::{JobResult, Row};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct JobOutput {
    pub job_id: String,
    pub complete: bool,
    pub partitions: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<usize>,
    /// `null` marks a partition that never came back.
    pub rows: Vec<Option<Row>>,
}

impl From<JobResult> for JobOutput {
    fn from(result: JobResult) -> Self {
        Self {
            job_id: result.job_id.to_string(),
            complete: result.is_complete(),
            partitions: result.rows.len(),
            missing: result.missing_partitions(),
            rows: result.rows,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rowmesh_core::JobId;

    #[test]
    fn partial_result_lists_missing() {
        let output = JobOutput::from(JobResult {
            job_id: JobId::new(4),
            rows: vec![Some(vec![1, 2]), None],
        });
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["job_id"], "job-4");
        assert_eq!(json["complete"], false);
        assert_eq!(json["missing"], serde_json::json!([1]));
        assert_eq!(json["rows"], serde_json::json!([[1, 2], null]));
    }

    #[test]
    fn complete_result_omits_missing() {
        let output = JobOutput::from(JobResult {
            job_id: JobId::new(1),
            rows: vec![Some(vec![7])],
        });
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["complete"], true);
        assert!(json.get("missing").is_none());
    }
}
