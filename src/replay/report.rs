//! Pass/fail aggregation and the HTML report artifact

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::replay::{DiffKind, ReplayResult};
use crate::Result;

/// Streams pass/fail tallies as results arrive and renders the final
/// report artifact
#[derive(Debug, Default)]
pub struct Reporter {
    passed: usize,
    failed: usize,
}

impl Reporter {
    /// Create an empty reporter
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one result into the tally
    pub fn record(&mut self, result: &ReplayResult) {
        if result.is_match {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
    }

    /// Matching entries so far
    #[must_use]
    pub fn passed(&self) -> usize {
        self.passed
    }

    /// Mismatching entries so far
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Render the report and write it atomically.
    ///
    /// The artifact lands via a sibling temp file and rename, so readers
    /// never observe a half-written report. An existing file is replaced.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written or renamed
    pub async fn write_report(&self, path: &Path, results: &[ReplayResult]) -> Result<()> {
        let html = self.render_html(results);

        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);

        tokio::fs::write(&tmp, html.as_bytes()).await?;
        tokio::fs::rename(&tmp, path).await?;

        debug!("Report written to {}", path.display());
        Ok(())
    }

    /// Render the self-contained HTML report
    #[must_use]
    pub fn render_html(&self, results: &[ReplayResult]) -> String {
        let total = results.len();
        let mut rows = String::new();
        let mut failures = String::new();

        for result in results {
            let (verdict, row_class) = if result.is_match {
                ("PASS", "pass")
            } else {
                ("FAIL", "fail")
            };

            rows.push_str(&format!(
                "<tr class=\"{row_class}\"><td>{}</td><td>{}</td><td>{}</td>\
                 <td>{}</td><td>{}</td><td>{} ms</td><td>{} ms</td><td>{verdict}</td></tr>\n",
                result.id,
                html_escape(&result.method),
                html_escape(&result.url),
                result.status1,
                result.status2,
                result.time1,
                result.time2,
            ));

            if let Some(diff) = &result.diff {
                failures.push_str(&format!(
                    "<div class=\"failure\"><h3>#{} {} {}</h3><pre>",
                    result.id,
                    html_escape(&result.method),
                    html_escape(&result.url)
                ));

                for segment in diff {
                    let (prefix, class) = match segment.kind {
                        DiffKind::Added => ('+', "added"),
                        DiffKind::Removed => ('-', "removed"),
                        DiffKind::Unchanged => (' ', "same"),
                    };
                    for line in segment.value.split('\n') {
                        failures.push_str(&format!(
                            "<span class=\"{class}\">{prefix} {}</span>\n",
                            html_escape(line)
                        ));
                    }
                }

                failures.push_str("</pre></div>\n");
            }
        }

        let failures_section = if failures.is_empty() {
            String::new()
        } else {
            format!("<h2>Failures</h2>\n{failures}")
        };

        format!(
            r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Differential Replay Report</title>
<style>
body {{ font-family: sans-serif; margin: 2em; color: #222; }}
.summary {{ display: flex; gap: 1em; margin-bottom: 2em; }}
.card {{ border: 1px solid #ccc; border-radius: 6px; padding: 1em 2em; text-align: center; }}
.card .num {{ font-size: 2em; font-weight: bold; }}
.card.passed .num {{ color: #2a7a2a; }}
.card.failed .num {{ color: #b02a2a; }}
table {{ border-collapse: collapse; width: 100%; }}
th, td {{ border: 1px solid #ddd; padding: 6px 10px; text-align: left; }}
tr.fail {{ background: #fbeaea; }}
.failure {{ margin-top: 1.5em; }}
.failure pre {{ background: #f6f6f6; padding: 1em; overflow-x: auto; }}
.failure .added {{ color: #2a7a2a; }}
.failure .removed {{ color: #b02a2a; }}
.failure .same {{ color: #666; }}
</style>
</head>
<body>
<h1>Differential Replay Report</h1>
<div class="summary">
<div class="card"><div class="num">{total}</div><div>Total</div></div>
<div class="card passed"><div class="num">{passed}</div><div>Passed</div></div>
<div class="card failed"><div class="num">{failed}</div><div>Failed</div></div>
</div>
<table>
<thead><tr><th>#</th><th>Method</th><th>URL</th><th>Status A</th><th>Status B</th>
<th>Time A</th><th>Time B</th><th>Result</th></tr></thead>
<tbody>
{rows}</tbody>
</table>
{failures_section}</body>
</html>
"#,
            passed = self.passed,
            failed = self.failed,
        )
    }
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
