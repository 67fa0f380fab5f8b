use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;

use crate::config::Config;
use crate::editor::{EditorError, EditorSession};
use crate::gateway::MappingGateway;
use crate::mapping::Mapping;
use crate::render::MediaBoxRenderer;
use crate::signing::Signer;
use crate::store::{FsDocumentStore, FsRecordStore, PersistenceError, UrlSigner};

pub type SessionId = u64;

/// Server-wide state shared by every request.
pub struct GlobalContext {
    pub config: Config,
    pub docs: FsDocumentStore,
    pub records: FsRecordStore,
    sessions: Mutex<HashMap<SessionId, EditorSession>>,
    next_session: AtomicU64,
}

impl GlobalContext {
    pub fn new(config: Config) -> GlobalContext {
        let signer = if config.signed_url_secret.is_empty() {
            log::warn!("No signed_url_secret configured, signed URLs will not survive a restart");
            UrlSigner::new(&config.public_base_url, &UrlSigner::random_secret())
        } else {
            UrlSigner::new(&config.public_base_url, &config.signed_url_secret)
        };
        GlobalContext {
            docs: FsDocumentStore::new(config.data_dir.join("documents"), signer),
            records: FsRecordStore::new(config.data_dir.join("records")),
            config,
            sessions: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(1),
        }
    }

    pub fn gateway(&self) -> MappingGateway<'_, FsRecordStore, FsDocumentStore> {
        MappingGateway::new(&self.records, &self.docs)
    }

    pub fn signer(&self) -> Signer<'_, FsRecordStore, FsDocumentStore> {
        Signer::new(
            &self.records,
            &self.docs,
            &self.config.signed_pdf_prefix,
            self.config.signed_url_ttl(),
        )
    }

    /// Starts editing the mapping of a template. `field_keys` are the fields of the form,
    /// any of them missing from the mapping is added unplaced.
    pub async fn open_session(
        &self,
        template_id: &str,
        field_keys: &[String],
    ) -> Result<SessionId, EditorError> {
        let gateway = self.gateway();
        let mut mapping = gateway
            .load(template_id)
            .await?
            .ok_or_else(|| PersistenceError::NotFound(template_id.to_string()))?;
        mapping.sync_fields(field_keys.iter().map(String::as_str));
        let pdf = gateway.template_pdf(&mapping).await?;
        let renderer = MediaBoxRenderer::from_bytes(&pdf)?;

        let mut session = EditorSession::new(
            template_id,
            mapping,
            Box::new(renderer),
            self.config.render_scale,
        );
        session.capture_current_page()?;

        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        self.sessions.lock().await.insert(id, session);
        log::info!("Opened editor session {id} on template {template_id}");
        Ok(id)
    }

    pub fn sessions(&self) -> &Mutex<HashMap<SessionId, EditorSession>> {
        &self.sessions
    }

    /// Persists a session's mapping. The session table is only locked while the snapshot is
    /// taken, not during the write.
    pub async fn save_session(&self, id: SessionId) -> Result<Option<Mapping>, EditorError> {
        let (template_id, mapping) = {
            let sessions = self.sessions.lock().await;
            let Some(session) = sessions.get(&id) else {
                return Ok(None);
            };
            (session.template_id().to_owned(), session.snapshot_for_save()?)
        };
        self.gateway().save(&template_id, &mapping).await?;
        Ok(Some(mapping))
    }

    /// Drops a session and every unsaved edit in it.
    pub async fn close_session(&self, id: SessionId) -> bool {
        self.sessions.lock().await.remove(&id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::unix_now;

    #[tokio::test]
    async fn test_save_session() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = GlobalContext::new(Config {
            data_dir: dir.path().to_owned(),
            signed_url_secret: "k".to_string(),
            render_scale: 1.0,
            ..Config::default()
        });
        ctx.gateway()
            .attach_template("t", crate::render::tests::blank_pdf_bytes(&[(612.0, 792.0)]))
            .await
            .unwrap();
        let id = ctx.open_session("t", &["nome".to_string()]).await.unwrap();
        let index = {
            let mut sessions = ctx.sessions().lock().await;
            let session = sessions.get_mut(&id).unwrap();
            session.select_field("nome").unwrap();
            let index = session.click_page(crate::coords::Vector2::new(61.2, 79.2)).unwrap();
            session
                .pointer_down(index, crate::coords::Vector2::new(0.0, 0.0), Default::default())
                .unwrap();
            index
        };

        assert!(matches!(
            ctx.save_session(id).await,
            Err(EditorError::DragInProgress)
        ));
        ctx.sessions().lock().await.get_mut(&id).unwrap().pointer_up();

        let saved = ctx.save_session(id).await.unwrap().unwrap();
        assert!(ctx.sessions().try_lock().is_ok());
        assert_eq!(ctx.gateway().load("t").await.unwrap(), Some(saved.clone()));
        assert!((saved.coordinates(index).unwrap().x - 10.0).abs() < 1e-9);
        assert_eq!(ctx.save_session(id + 1).await.unwrap(), None);
    }

    #[test]
    fn test_missing_secret_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            data_dir: dir.path().to_owned(),
            ..Config::default()
        };
        assert!(config.signed_url_secret.is_empty());
        let ctx = GlobalContext::new(config);

        // A link made without any secret must not open anything.
        let now = unix_now();
        let forged = UrlSigner::new("http://localhost:3000", "").sign(
            "templates/t.pdf",
            std::time::Duration::from_secs(60),
            now,
        );
        let (_, query) = forged.split_once('?').unwrap();
        let expires: i64 = query
            .split('&')
            .find_map(|kv| kv.strip_prefix("expires="))
            .unwrap()
            .parse()
            .unwrap();
        let token = forged.rsplit_once("token=").unwrap().1;
        assert!(!ctx.docs.signer().verify("templates/t.pdf", expires, token, now));

        let genuine = ctx
            .docs
            .signer()
            .sign("templates/t.pdf", std::time::Duration::from_secs(60), now);
        let token = genuine.rsplit_once("token=").unwrap().1;
        assert!(ctx.docs.signer().verify("templates/t.pdf", expires, token, now));
    }
}
