//! The append-only audit trail kept inside a response record.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use super::Cpf;

/// Key of the log inside `responseData`.
pub const SIGNATURES_KEY: &str = "__signatures";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureLogEntry {
    /// Display form, `000.000.000-00`.
    pub cpf: String,
    #[serde(with = "time::serde::rfc3339")]
    pub signed_at: OffsetDateTime,
    pub pages: Vec<u32>,
    pub message: String,
}

impl SignatureLogEntry {
    pub fn new(
        cpf: &Cpf,
        signed_at: OffsetDateTime,
        pages: Vec<u32>,
        message: Option<String>,
    ) -> SignatureLogEntry {
        let message = message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| default_message(cpf, &pages));
        SignatureLogEntry {
            cpf: cpf.to_string(),
            signed_at,
            pages,
            message,
        }
    }
}

fn default_message(cpf: &Cpf, pages: &[u32]) -> String {
    let list = pages
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    let noun = if pages.len() == 1 { "página" } else { "páginas" };
    format!("Documento assinado digitalmente por CPF {cpf} ({noun} {list})")
}

/// A form response as kept in the record store. Unknown keys of `responseData` are carried
/// through untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRecord {
    #[serde(default)]
    pub response_data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_pdf_path: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ResponseRecord {
    pub fn signatures(&self) -> Result<Vec<SignatureLogEntry>, serde_json::Error> {
        match self.response_data.get(SIGNATURES_KEY) {
            Some(v) => Vec::<SignatureLogEntry>::deserialize(v),
            None => Ok(Vec::new()),
        }
    }

    pub fn append_signature(&mut self, entry: SignatureLogEntry) -> Result<(), serde_json::Error> {
        let mut log = self.signatures()?;
        log.push(entry);
        self.response_data
            .insert(SIGNATURES_KEY.to_owned(), serde_json::to_value(log)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn cpf() -> Cpf {
        Cpf::parse("52998224725").unwrap()
    }

    #[test]
    fn test_default_message() {
        let e = SignatureLogEntry::new(&cpf(), datetime!(2024-03-05 14:07 -3), vec![1, 3], None);
        assert_eq!(
            e.message,
            "Documento assinado digitalmente por CPF 529.982.247-25 (páginas 1, 3)"
        );
        let e = SignatureLogEntry::new(
            &cpf(),
            datetime!(2024-03-05 14:07 -3),
            vec![2],
            Some("  ".to_string()),
        );
        assert!(e.message.ends_with("(página 2)"));
        let e = SignatureLogEntry::new(
            &cpf(),
            datetime!(2024-03-05 14:07 -3),
            vec![2],
            Some("ok".to_string()),
        );
        assert_eq!(e.message, "ok");
    }

    #[test]
    fn test_append_keeps_order_and_other_data() {
        let mut record: ResponseRecord = serde_json::from_value(serde_json::json!({
            "responseData": { "nome": "Ana" },
            "status": "open"
        }))
        .unwrap();
        let first = SignatureLogEntry::new(&cpf(), datetime!(2024-03-05 14:07 UTC), vec![1], None);
        let second = SignatureLogEntry::new(&cpf(), datetime!(2024-03-06 9:00 UTC), vec![2], None);
        record.append_signature(first.clone()).unwrap();
        record.append_signature(second.clone()).unwrap();

        assert_eq!(record.signatures().unwrap(), vec![first, second]);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["responseData"]["nome"], "Ana");
        assert_eq!(json["status"], "open");
        assert_eq!(
            json["responseData"]["__signatures"][0]["signedAt"],
            "2024-03-05T14:07:00Z"
        );
        assert_eq!(json["responseData"]["__signatures"][0]["cpf"], "529.982.247-25");
    }
}
