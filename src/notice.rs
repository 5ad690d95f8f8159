// Stderr notices for rows a dump skipped instead of failing on.
use serde_json::{Map, Value, json};

pub const DAMAGED_ROW: &str = "damaged_row";

/// One skipped-row event; `details` carries the row id and the error that damaged it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: String,
    pub time: String,
    pub cmd: String,
    pub source: String,
    pub message: String,
    pub details: Map<String, Value>,
}

impl Notice {
    pub fn damaged_row(cmd: &str, source: &str, row_id: i64, time: String) -> Self {
        let mut details = Map::new();
        details.insert("row_id".to_string(), json!(row_id));
        Self {
            kind: DAMAGED_ROW.to_string(),
            time,
            cmd: cmd.to_string(),
            source: source.to_string(),
            message: format!("skipped damaged row {row_id}"),
            details,
        }
    }

    pub fn with_error(mut self, kind: &str, message: &str) -> Self {
        self.details.insert("error_kind".to_string(), json!(kind));
        self.details.insert("error".to_string(), json!(message));
        self
    }
}

/// `{"notice":{...}}`, one line per skipped row.
pub fn notice_json(notice: &Notice) -> Value {
    json!({
        "notice": {
            "kind": notice.kind,
            "time": notice.time,
            "cmd": notice.cmd,
            "source": notice.source,
            "message": notice.message,
            "details": notice.details,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::{DAMAGED_ROW, Notice, notice_json};

    #[test]
    fn damaged_row_notice_names_row_and_error() {
        let notice = Notice::damaged_row("fastq", "SRR000001", 42, "2026-02-01T00:00:00Z".into())
            .with_error("NotFound", "row outside column 'QUALITY'");
        let value = notice_json(&notice);
        let obj = value["notice"].as_object().expect("notice object");

        assert_eq!(obj["kind"], DAMAGED_ROW);
        assert_eq!(obj["time"], "2026-02-01T00:00:00Z");
        assert_eq!(obj["cmd"], "fastq");
        assert_eq!(obj["source"], "SRR000001");
        assert_eq!(obj["message"], "skipped damaged row 42");
        assert_eq!(obj["details"]["row_id"], 42);
        assert_eq!(obj["details"]["error_kind"], "NotFound");
    }
}
