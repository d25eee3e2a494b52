use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::editor::Editor;
use crate::error::{EngineError, Result};
use crate::io::{ImageResolver, PersistenceStore, SessionId};
use crate::settings::EngineSettings;

/// One editing session: an editor plus the bookkeeping its owner needs.
pub struct Session {
    pub id: SessionId,
    pub name: String,
    pub editor: Editor,
    /// Editor revision at the last successful save.
    saved_revision: u64,
}

impl Session {
    pub fn new(name: impl Into<String>, settings: EngineSettings) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            editor: Editor::new(settings),
            saved_revision: 0,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.editor.revision() != self.saved_revision
    }

    pub fn mark_clean(&mut self) {
        self.saved_revision = self.editor.revision();
    }

    /// Display title with a dirty marker.
    pub fn display_title(&self) -> String {
        if self.is_dirty() {
            format!("{}*", self.name)
        } else {
            self.name.clone()
        }
    }
}

/// Open sessions keyed by session id. Owned by the host's controller.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, Session>,
    untitled_counter: usize,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_untitled(&mut self, settings: EngineSettings) -> SessionId {
        self.untitled_counter += 1;
        let name = format!("Untitled-{}", self.untitled_counter);
        self.insert(Session::new(name, settings))
    }

    pub fn insert(&mut self, session: Session) -> SessionId {
        let id = session.id;
        tracing::debug!(session = %id, name = %session.name, "Session opened");
        self.sessions.insert(id, session);
        id
    }

    pub fn get(&self, id: SessionId) -> Result<&Session> {
        self.sessions.get(&id).ok_or(EngineError::UnknownSession(id))
    }

    pub fn get_mut(&mut self, id: SessionId) -> Result<&mut Session> {
        self.sessions.get_mut(&id).ok_or(EngineError::UnknownSession(id))
    }

    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        self.sessions.remove(&id)
    }

    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Persists a session and marks it clean. In background mode it is marked
    /// clean once the write is handed off.
    pub fn save(&mut self, id: SessionId, store: Arc<dyn PersistenceStore>) -> Result<()> {
        let session = self.get_mut(id)?;
        session.editor.persist(store, id)?;
        session.mark_clean();
        Ok(())
    }

    /// Loads a persisted session under its original id.
    pub fn open(
        &mut self,
        id: SessionId,
        name: impl Into<String>,
        store: &dyn PersistenceStore,
        resolver: &dyn ImageResolver,
        settings: EngineSettings,
    ) -> Result<Vec<String>> {
        let bytes = store.load(id)?.ok_or(EngineError::UnknownSession(id))?;
        let mut session = Session::new(name, settings);
        session.id = id;
        let skipped = session.editor.restore_persisted(&bytes, resolver)?;
        session.mark_clean();
        self.insert(session);
        Ok(skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{ImageLibrary, MemoryStore};
    use crate::ops::canvas_ops::Placement;
    use image::RgbaImage;

    #[test]
    fn save_and_reopen_session() {
        let mut registry = SessionRegistry::new();
        let id = registry.create_untitled(EngineSettings::inline());
        {
            let session = registry.get_mut(id).unwrap();
            session
                .editor
                .add_layer(RgbaImage::new(4, 4), "tile", "tile", Placement::Center)
                .unwrap();
            assert!(session.is_dirty());
            assert_eq!(session.display_title(), "Untitled-1*");
        }
        let memory = MemoryStore::default();
        registry.save(id, Arc::new(memory.clone())).unwrap();
        assert!(!registry.get(id).unwrap().is_dirty());

        let mut library = ImageLibrary::default();
        library.insert("tile", Arc::new(RgbaImage::new(4, 4)));
        let mut other = SessionRegistry::new();
        let skipped = other.open(id, "Reopened", &memory, &library, EngineSettings::inline()).unwrap();
        assert!(skipped.is_empty());
        assert_eq!(other.get(id).unwrap().editor.store().len(), 1);
    }

    #[test]
    fn unknown_session_is_an_error() {
        let mut registry = SessionRegistry::new();
        let missing = Uuid::new_v4();
        assert!(matches!(registry.get(missing), Err(EngineError::UnknownSession(_))));
        let err = registry.open(missing, "x", &MemoryStore::default(), &ImageLibrary::default(), EngineSettings::inline());
        assert!(matches!(err, Err(EngineError::UnknownSession(_))));
    }
}
