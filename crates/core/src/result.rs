//! Per-item analysis results and the statistics derived from them.
//!
//! Results are produced by the analysis service and delivered over the
//! result stream; the client never fabricates one. A [`ResultRecord`] is an
//! explicit success-or-failure variant so every consumer has to handle
//! both cases.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Extracted label data
// ---------------------------------------------------------------------------

/// Structured fields the vision extraction pulls off a label image.
///
/// Every field is optional on the wire. Keys the client does not know
/// about (model bookkeeping and the like) are preserved in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedLabel {
    #[serde(default)]
    pub brand_name: Option<String>,
    #[serde(default)]
    pub product_type: Option<String>,
    #[serde(default)]
    pub alcohol_by_volume: Option<String>,
    #[serde(default)]
    pub net_contents: Option<String>,
    #[serde(default)]
    pub country_of_origin: Option<String>,
    #[serde(default)]
    pub government_warning_present: Option<bool>,
    #[serde(default)]
    pub government_warning_text: Option<String>,
    #[serde(default)]
    pub government_warning_header_all_caps: Option<bool>,
    #[serde(default)]
    pub government_warning_header_bold: Option<bool>,
    #[serde(default)]
    pub sulfite_declaration_present: Option<bool>,
    #[serde(default)]
    pub class_type_designation: Option<String>,
    #[serde(default)]
    pub producer_name: Option<String>,
    #[serde(default)]
    pub producer_address: Option<String>,
    #[serde(default)]
    pub raw_text_extracted: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Compliance
// ---------------------------------------------------------------------------

/// Classification of a detected issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Hard failure, blocks approval.
    Critical,
    /// A human should verify before approving.
    NeedsReview,
    /// Informational only; does not affect the outcome.
    Info,
}

/// Which family of checks produced an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    Presence,
    Comparison,
}

/// One compliance finding for a label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub field: String,
    pub severity: Severity,
    pub message: String,
    #[serde(default = "default_issue_type")]
    pub issue_type: IssueType,
}

fn default_issue_type() -> IssueType {
    IssueType::Presence
}

/// Compliance evaluation for one label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Compliance {
    pub passed: bool,
    #[serde(default)]
    pub issues: Vec<Issue>,
}

// ---------------------------------------------------------------------------
// Comparison against a reference row
// ---------------------------------------------------------------------------

/// Per-field match status against the reference row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Match,
    Mismatch,
    Partial,
    NotFound,
    NeedsReview,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonField {
    pub field: String,
    #[serde(default)]
    pub expected: serde_json::Value,
    #[serde(default)]
    pub extracted: serde_json::Value,
    pub status: MatchStatus,
    #[serde(default)]
    pub message: String,
}

/// Field-level comparison of extracted data with the matched reference row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    /// `label_id` of the reference row the image was matched to.
    #[serde(default)]
    pub matched_row: Option<String>,
    #[serde(default)]
    pub fields: Vec<ComparisonField>,
}

// ---------------------------------------------------------------------------
// ResultRecord
// ---------------------------------------------------------------------------

/// Successful analysis of one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelResult {
    #[serde(default)]
    pub file_id: Option<i64>,
    #[serde(default)]
    pub filename: String,
    pub data: ExtractedLabel,
    pub compliance: Compliance,
    #[serde(default)]
    pub comparison: Option<Comparison>,
}

/// Analysis of one image failed server-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelFailure {
    #[serde(default)]
    pub file_id: Option<i64>,
    #[serde(default)]
    pub filename: String,
    pub message: String,
}

/// The outcome for one client index.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultRecord {
    Success(LabelResult),
    Failure(LabelFailure),
}

impl ResultRecord {
    pub fn filename(&self) -> &str {
        match self {
            ResultRecord::Success(r) => &r.filename,
            ResultRecord::Failure(f) => &f.filename,
        }
    }

    /// Classify this record for summary statistics.
    pub fn outcome(&self) -> Outcome {
        match self {
            ResultRecord::Failure(_) => Outcome::Errored,
            ResultRecord::Success(r) if !r.compliance.passed => Outcome::Rejected,
            ResultRecord::Success(r)
                if r
                    .compliance
                    .issues
                    .iter()
                    .any(|i| i.severity == Severity::NeedsReview) =>
            {
                Outcome::NeedsReview
            }
            ResultRecord::Success(_) => Outcome::Passed,
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome and summary
// ---------------------------------------------------------------------------

/// Derived per-item verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    NeedsReview,
    Rejected,
    /// Analysis itself failed; distinct from every compliance verdict.
    Errored,
}

/// Outcome counts over a set of records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub passed: usize,
    pub needs_review: usize,
    pub rejected: usize,
    pub errored: usize,
}

impl BatchSummary {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a ResultRecord>) -> Self {
        records
            .into_iter()
            .fold(Self::default(), |mut summary, record| {
                summary.total += 1;
                match record.outcome() {
                    Outcome::Passed => summary.passed += 1,
                    Outcome::NeedsReview => summary.needs_review += 1,
                    Outcome::Rejected => summary.rejected += 1,
                    Outcome::Errored => summary.errored += 1,
                }
                summary
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn success(passed: bool, severities: &[Severity]) -> ResultRecord {
        ResultRecord::Success(LabelResult {
            file_id: Some(0),
            filename: "a.jpg".into(),
            data: ExtractedLabel::default(),
            compliance: Compliance {
                passed,
                issues: severities
                    .iter()
                    .map(|&severity| Issue {
                        field: "net_contents".into(),
                        severity,
                        message: "m".into(),
                        issue_type: IssueType::Presence,
                    })
                    .collect(),
            },
            comparison: None,
        })
    }

    #[test]
    fn outcome_classification() {
        assert_eq!(success(true, &[]).outcome(), Outcome::Passed);
        assert_eq!(success(true, &[Severity::Info]).outcome(), Outcome::Passed);
        assert_eq!(
            success(true, &[Severity::Info, Severity::NeedsReview]).outcome(),
            Outcome::NeedsReview
        );
        assert_eq!(
            success(false, &[Severity::Critical, Severity::NeedsReview]).outcome(),
            Outcome::Rejected
        );
        let failure = ResultRecord::Failure(LabelFailure {
            file_id: None,
            filename: "b.png".into(),
            message: "vision call failed".into(),
        });
        assert_eq!(failure.outcome(), Outcome::Errored);
    }

    #[test]
    fn summary_counts_failures_separately() {
        let records = vec![
            success(true, &[]),
            success(false, &[Severity::Critical]),
            success(true, &[Severity::NeedsReview]),
            ResultRecord::Failure(LabelFailure {
                file_id: None,
                filename: "x.png".into(),
                message: "boom".into(),
            }),
        ];
        let summary = BatchSummary::from_records(&records);
        assert_eq!(
            summary,
            BatchSummary {
                total: 4,
                passed: 1,
                needs_review: 1,
                rejected: 1,
                errored: 1,
            }
        );
    }

    #[test]
    fn extracted_label_keeps_unknown_keys() {
        let json = r#"{"brand_name":"Old Tom","government_warning_present":true,"_model_used":"m"}"#;
        let data: ExtractedLabel = serde_json::from_str(json).unwrap();
        assert_eq!(data.brand_name.as_deref(), Some("Old Tom"));
        assert_eq!(data.government_warning_present, Some(true));
        assert_eq!(data.extra["_model_used"], "m");
    }
}
