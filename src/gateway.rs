//! Whole-document persistence of mappings, plus the template lifecycle around them.
//!
//! There is no versioning: the last save wins.

use crate::mapping::Mapping;
use crate::store::{DocumentStore, PersistenceError, RecordStore, UploadOptions};

pub const MAPPINGS: &str = "mappings";

pub fn template_pdf_path(template_id: &str) -> String {
    format!("templates/{template_id}.pdf")
}

pub struct MappingGateway<'a, R, D> {
    records: &'a R,
    docs: &'a D,
}

impl<'a, R: RecordStore, D: DocumentStore> MappingGateway<'a, R, D> {
    pub fn new(records: &'a R, docs: &'a D) -> Self {
        MappingGateway { records, docs }
    }

    /// Overwrites whatever mapping the template had.
    pub async fn save(&self, template_id: &str, mapping: &Mapping) -> Result<(), PersistenceError> {
        let value = serde_json::to_value(mapping)?;
        self.records.put(MAPPINGS, template_id, value).await?;
        log::info!(
            "Saved mapping of template {} ({} fields)",
            template_id,
            mapping.fields.len()
        );
        Ok(())
    }

    pub async fn load(&self, template_id: &str) -> Result<Option<Mapping>, PersistenceError> {
        match self.records.get(MAPPINGS, template_id).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Stores the template PDF and makes sure the template has a mapping.
    ///
    /// Re-attaching replaces the PDF but keeps an existing mapping.
    pub async fn attach_template(
        &self,
        template_id: &str,
        pdf: Vec<u8>,
    ) -> Result<Mapping, PersistenceError> {
        let path = template_pdf_path(template_id);
        self.docs.upload(&path, pdf, UploadOptions::pdf(true)).await?;
        if let Some(existing) = self.load(template_id).await? {
            return Ok(existing);
        }
        let mapping = Mapping::new(path);
        self.save(template_id, &mapping).await?;
        log::info!("Attached PDF to template {}", template_id);
        Ok(mapping)
    }

    /// Drops the mapping and the template PDF. Returns whether a mapping existed.
    pub async fn remove_template(&self, template_id: &str) -> Result<bool, PersistenceError> {
        let existed = self.records.delete(MAPPINGS, template_id).await?;
        match self.docs.remove(&template_pdf_path(template_id)).await {
            Ok(()) | Err(PersistenceError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        log::info!("Removed template {}", template_id);
        Ok(existed)
    }

    pub async fn template_pdf(&self, mapping: &Mapping) -> Result<Vec<u8>, PersistenceError> {
        self.docs.download(&mapping.template_url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::Vector2;
    use crate::mapping::{Coordinates, FieldPlacement, FieldType, FontFamily};
    use crate::store::memory::{MemoryDocumentStore, MemoryRecordStore};

    #[tokio::test]
    async fn test_save_then_load_is_identical() {
        let records = MemoryRecordStore::default();
        let docs = MemoryDocumentStore::default();
        let gateway = MappingGateway::new(&records, &docs);

        let mapping = Mapping {
            template_url: "t.pdf".to_string(),
            fields: vec![FieldPlacement {
                field_key: "nome".to_string(),
                field_type: FieldType::Text,
                coordinates: Some(Coordinates {
                    x: 10.0,
                    y: 10.0,
                    page: 1,
                    width: 30.0,
                    height: 3.0,
                    font_size: 10,
                    font_family: FontFamily::Normal,
                }),
            }],
        };
        gateway.save("tpl", &mapping).await.unwrap();
        assert_eq!(gateway.load("tpl").await.unwrap(), Some(mapping));
        assert_eq!(gateway.load("other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_last_save_wins() {
        let records = MemoryRecordStore::default();
        let docs = MemoryDocumentStore::default();
        let gateway = MappingGateway::new(&records, &docs);

        let mut a = Mapping::new("t.pdf");
        a.place_field("nome", 1, Vector2::new(1.0, 1.0));
        let b = Mapping::new("t.pdf");
        gateway.save("tpl", &a).await.unwrap();
        gateway.save("tpl", &b).await.unwrap();
        assert_eq!(gateway.load("tpl").await.unwrap(), Some(b));
    }

    #[tokio::test]
    async fn test_template_lifecycle() {
        let records = MemoryRecordStore::default();
        let docs = MemoryDocumentStore::default();
        let gateway = MappingGateway::new(&records, &docs);

        let mapping = gateway.attach_template("tpl", b"%PDF".to_vec()).await.unwrap();
        assert_eq!(mapping.template_url, "templates/tpl.pdf");
        assert!(mapping.fields.is_empty());
        assert_eq!(gateway.template_pdf(&mapping).await.unwrap(), b"%PDF");

        let mut edited = mapping.clone();
        edited.sync_fields(["nome"]);
        gateway.save("tpl", &edited).await.unwrap();
        let again = gateway.attach_template("tpl", b"%PDF-2".to_vec()).await.unwrap();
        assert_eq!(again, edited);

        assert!(gateway.remove_template("tpl").await.unwrap());
        assert_eq!(gateway.load("tpl").await.unwrap(), None);
        assert!(docs.file("templates/tpl.pdf").is_none());
        assert!(!gateway.remove_template("tpl").await.unwrap());
    }
}
