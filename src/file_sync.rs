//! One-shot synchronizer that loads a ruleset snapshot from a local JSON
//! file. Useful for tests, air-gapped deployments and CI, where polling a
//! server is not an option.
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::repository::Repository;
use crate::repository_store::RepositoryStore;
use crate::{Error, Result};

/// Read `path`, parse it as a [`Repository`] document and refresh `store`.
///
/// A failed load never touches a previously published snapshot.
pub fn sync_from_file(path: impl AsRef<Path>, store: &RepositoryStore) -> Result<()> {
    let path = path.as_ref();

    let file = File::open(path).inspect_err(|err| {
        log::error!(target: "flagship",
                    path:display = path.display();
                    "repository file not found: {err}");
    })?;

    let repository: Repository = serde_json::from_reader(BufReader::new(file)).map_err(|err| {
        log::error!(target: "flagship",
                    path:display = path.display();
                    "bad repository JSON format in file: {err}");
        Error::RepositoryParseError
    })?;

    store.refresh(Some(repository));
    Ok(())
}
