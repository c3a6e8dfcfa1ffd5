//! Owned collaborator bundle for rule unit tests.

use super::RuleContext;
use crate::ingest::test_support::StubIngestor;
use crate::journal::JournalClient;
use crate::path_search::RunFileFinder;
use std::path::PathBuf;

pub struct TestContext {
    pub ingestor: StubIngestor,
    pub journal: JournalClient,
    pub finder: RunFileFinder,
    pub imat_root: PathBuf,
}

impl TestContext {
    pub fn new() -> Self {
        Self {
            ingestor: StubIngestor::default(),
            // Unroutable collaborators: rules under test here must not
            // reach the journal or the archive.
            journal: JournalClient::new("http://127.0.0.1:9"),
            finder: RunFileFinder::new("/nonexistent-archive", 1),
            imat_root: PathBuf::from("/imat"),
        }
    }

    pub fn ctx(&self) -> RuleContext<'_> {
        RuleContext {
            ingestor: &self.ingestor,
            journal: &self.journal,
            finder: &self.finder,
            imat_root: &self.imat_root,
        }
    }
}
