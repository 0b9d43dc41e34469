// mailsentry/src/eval/report.rs
//
// Markdown / JSON rendering of an EvalReport.

use std::fmt::Write as _;

use chrono::Utc;

use super::EvalReport;

/// Render the full markdown report: ranked strategies, then detectors.
pub fn markdown(report: &EvalReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# mailsentry Evaluation Report\n");
    let _ = writeln!(
        out,
        "**Items**: {}  **Positive**: {}  **Negative**: {}  **Elapsed**: {} ms\n",
        report.items, report.positives, report.negatives, report.elapsed_ms
    );

    let _ = writeln!(out, "## Strategies (best first)\n");
    let _ = writeln!(out, "| # | Strategy | Accuracy | Precision | Recall | F1 | FPR | TP | TN | FP | FN |");
    let _ = writeln!(out, "|---|----------|----------|-----------|--------|----|-----|----|----|----|----|");
    for (i, s) in report.strategies.iter().enumerate() {
        let m = &s.matrix;
        let _ = writeln!(
            out,
            "| {} | {} | {:.2}% | {:.2}% | {:.2}% | {:.2}% | {:.2}% | {} | {} | {} | {} |",
            i + 1, s.strategy, s.accuracy, s.precision, s.recall, s.f1, s.fpr, m.tp, m.tn, m.fp, m.fn_
        );
    }

    let _ = writeln!(out, "\n## Detectors\n");
    let _ = writeln!(out, "| Detector | Kind | Precision | Recall | F1 | Abstained |");
    let _ = writeln!(out, "|----------|------|-----------|--------|----|-----------|");
    for d in &report.detectors {
        let _ = writeln!(
            out,
            "| {} | {} | {:.2}% | {:.2}% | {:.2}% | {} |",
            d.detector, d.kind, d.matrix.precision(), d.matrix.recall(), d.f1(), d.abstentions
        );
    }

    let weights = report.suggested_weights();
    if !weights.is_empty() {
        let _ = writeln!(out, "\n## Suggested weights\n");
        let _ = writeln!(out, "```json\n{}\n```", serde_json::json!({ "kind": "weighted", "weights": weights }));
    }
    out
}

pub fn print_markdown(report: &EvalReport) {
    print!("{}", markdown(report));
}

/// Serialize the report for downstream consumption.
pub fn to_json(report: &EvalReport) -> serde_json::Result<String> {
    let value = serde_json::json!({
        "generated_at":      Utc::now().to_rfc3339(),
        "items":             report.items,
        "positives":         report.positives,
        "negatives":         report.negatives,
        "elapsed_ms":        report.elapsed_ms,
        "strategies":        report.strategies,
        "detectors":         report.detectors,
        "suggested_weights": report.suggested_weights(),
    });
    serde_json::to_string_pretty(&value)
}
