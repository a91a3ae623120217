//! Durable lifecycle state shared between provisioning and a later teardown.
//!
//! Provisioning records the exact parameters and working directory it used;
//! teardown runs in a separate process and rebuilds the destroy invocation
//! from this record alone.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::files::{open_parent, write_with_mode};
use crate::params::{ProvisioningParameters, UserData};

/// File name of the lifecycle record inside the invocation directory.
pub const DEFAULT_STATE_FILE: &str = ".cleanup-state.json";

/// Errors raised while reading or writing the lifecycle record.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StateError {
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when an existing record cannot be parsed.
    #[error("failed to parse lifecycle state {path}: {message}")]
    Parse {
        /// Path of the corrupt record.
        path: Utf8PathBuf,
        /// Parser error message.
        message: String,
    },
}

/// Parameters and working directory needed to reverse one provisioning run.
///
/// Field names match the engine variable names so the file reads the same
/// as the `-var` assignments it reproduces.
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
pub struct LifecycleStateRecord {
    /// IBM Cloud API key.
    pub ibmcloud_api_key: String,
    /// Power Virtual Server zone.
    pub powervs_zone: String,
    /// Resource name prefix.
    pub prefix: String,
    /// OS image name.
    pub powervs_os_image_name: String,
    /// Machine type.
    pub powervs_server_type: String,
    /// Processor count.
    pub powervs_number_of_processors: String,
    /// Memory size in GB.
    pub powervs_memory_size: String,
    /// Raw, unencoded user-data payload; empty when none was supplied.
    #[serde(default)]
    pub powervs_user_data: String,
    /// Directory the engine ran in.
    pub working_directory: Utf8PathBuf,
}

impl LifecycleStateRecord {
    /// Captures `params` and the directory they were applied in.
    #[must_use]
    pub fn new(params: &ProvisioningParameters, working_directory: &Utf8Path) -> Self {
        Self {
            ibmcloud_api_key: params.api_key.clone(),
            powervs_zone: params.zone.clone(),
            prefix: params.prefix.clone(),
            powervs_os_image_name: params.os_image_name.clone(),
            powervs_server_type: params.server_type.clone(),
            powervs_number_of_processors: params.number_of_processors.clone(),
            powervs_memory_size: params.memory_size.clone(),
            powervs_user_data: params.user_data.raw().to_owned(),
            working_directory: working_directory.to_path_buf(),
        }
    }

    /// Rebuilds the parameter set recorded at creation time.
    ///
    /// No validation is applied: teardown replays whatever was recorded.
    #[must_use]
    pub fn parameters(&self) -> ProvisioningParameters {
        let user_data = if self.powervs_user_data.is_empty() {
            UserData::Absent
        } else {
            UserData::from_raw(Some(&self.powervs_user_data))
        };
        ProvisioningParameters {
            api_key: self.ibmcloud_api_key.clone(),
            zone: self.powervs_zone.clone(),
            prefix: self.prefix.clone(),
            os_image_name: self.powervs_os_image_name.clone(),
            server_type: self.powervs_server_type.clone(),
            number_of_processors: self.powervs_number_of_processors.clone(),
            memory_size: self.powervs_memory_size.clone(),
            user_data,
        }
    }
}

/// Reads and writes the lifecycle record at a fixed path.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StateStore {
    path: Utf8PathBuf,
}

impl StateStore {
    /// Creates a store for the record at `path`.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Creates a store for [`DEFAULT_STATE_FILE`] inside `dir`.
    #[must_use]
    pub fn in_dir(dir: &Utf8Path) -> Self {
        Self::new(dir.join(DEFAULT_STATE_FILE))
    }

    /// Path of the record.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Writes `record` as pretty-printed JSON, replacing any previous record.
    /// The file is created owner-only because it holds the API key.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] when the file cannot be written.
    pub fn save(&self, record: &LifecycleStateRecord) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_str().is_empty()) {
            Dir::create_ambient_dir_all(parent, ambient_authority())
                .map_err(|err| self.io_error(&err))?;
        }
        let rendered = serde_json::to_string_pretty(record).map_err(|err| StateError::Io {
            path: self.path.clone(),
            message: err.to_string(),
        })?;
        write_with_mode(&self.path, rendered.as_bytes(), 0o600)
            .map_err(|err| self.io_error(&err))
    }

    /// Loads the record, returning `Ok(None)` when no record exists.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Parse`] when the file exists but is not a valid
    /// record, or [`StateError::Io`] when it cannot be read.
    pub fn load(&self) -> Result<Option<LifecycleStateRecord>, StateError> {
        let contents = match open_parent(&self.path)
            .and_then(|(dir, file_name)| dir.read_to_string(file_name))
        {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(self.io_error(&err)),
        };

        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|err| StateError::Parse {
                path: self.path.clone(),
                message: err.to_string(),
            })
    }

    /// Removes the record. A record that is already gone is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] when the file exists but cannot be removed.
    pub fn clear(&self) -> Result<(), StateError> {
        match open_parent(&self.path).and_then(|(dir, file_name)| dir.remove_file(file_name)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(self.io_error(&err)),
        }
    }

    fn io_error(&self, err: &io::Error) -> StateError {
        StateError::Io {
            path: self.path.clone(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    struct StoreFixture {
        _tmp: TempDir,
        dir: Utf8PathBuf,
        store: StateStore,
    }

    #[fixture]
    fn store_fixture() -> StoreFixture {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let dir = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
        let store = StateStore::in_dir(&dir);
        StoreFixture {
            _tmp: tmp,
            dir,
            store,
        }
    }

    fn params(user_data: Option<&str>) -> ProvisioningParameters {
        ProvisioningParameters::builder()
            .api_key("k1")
            .zone("lon04")
            .prefix("ci-test")
            .os_image_name("RHEL9-SP2")
            .server_type("s922")
            .number_of_processors("2")
            .memory_size("4")
            .user_data(user_data.map(str::to_owned))
            .build()
            .unwrap_or_else(|err| panic!("params: {err}"))
    }

    #[rstest]
    #[case::no_payload(None)]
    #[case::blank_payload(Some("  "))]
    #[case::script_payload(Some("#!/bin/sh\nyum -y install git\n"))]
    fn save_then_load_round_trips(store_fixture: StoreFixture, #[case] user_data: Option<&str>) {
        let record = LifecycleStateRecord::new(&params(user_data), &store_fixture.dir);

        store_fixture
            .store
            .save(&record)
            .unwrap_or_else(|err| panic!("save: {err}"));
        let loaded = store_fixture
            .store
            .load()
            .unwrap_or_else(|err| panic!("load: {err}"));

        assert_eq!(loaded, Some(record));
    }

    #[rstest]
    fn load_reports_absent_record(store_fixture: StoreFixture) {
        let loaded = store_fixture
            .store
            .load()
            .unwrap_or_else(|err| panic!("load: {err}"));
        assert_eq!(loaded, None);
    }

    #[rstest]
    fn load_reports_absent_record_in_missing_directory(store_fixture: StoreFixture) {
        let store = StateStore::in_dir(&store_fixture.dir.join("never-created"));
        assert_eq!(store.load(), Ok(None));
    }

    #[rstest]
    #[case("{ not json")]
    #[case("{\"prefix\": \"ci-test\"}")]
    #[case("")]
    fn load_rejects_corrupt_record(store_fixture: StoreFixture, #[case] contents: &str) {
        std::fs::write(store_fixture.store.path(), contents)
            .unwrap_or_else(|err| panic!("seed state: {err}"));

        let Err(err) = store_fixture.store.load() else {
            panic!("corrupt record should fail to load");
        };
        let StateError::Parse { path, .. } = err else {
            panic!("expected parse error, got {err:?}");
        };
        assert_eq!(path, store_fixture.store.path());
    }

    #[rstest]
    fn record_uses_engine_variable_names(store_fixture: StoreFixture) {
        let record = LifecycleStateRecord::new(&params(None), &store_fixture.dir);
        store_fixture
            .store
            .save(&record)
            .unwrap_or_else(|err| panic!("save: {err}"));

        let raw = std::fs::read_to_string(store_fixture.store.path())
            .unwrap_or_else(|err| panic!("read: {err}"));
        let value: serde_json::Value =
            serde_json::from_str(&raw).unwrap_or_else(|err| panic!("parse: {err}"));
        assert_eq!(value["powervs_zone"], "lon04");
        assert_eq!(value["powervs_user_data"], "");
        assert_eq!(value["working_directory"], store_fixture.dir.as_str());
    }

    #[rstest]
    fn parameters_reproduce_engine_variables(store_fixture: StoreFixture) {
        let original = params(Some("#cloud-config\n"));
        let record = LifecycleStateRecord::new(&original, &store_fixture.dir);
        assert_eq!(
            record.parameters().engine_variables(),
            original.engine_variables()
        );
        assert_eq!(record.parameters(), original);
    }

    #[rstest]
    fn clear_removes_record_and_tolerates_absence(store_fixture: StoreFixture) {
        let record = LifecycleStateRecord::new(&params(None), &store_fixture.dir);
        store_fixture
            .store
            .save(&record)
            .unwrap_or_else(|err| panic!("save: {err}"));

        store_fixture
            .store
            .clear()
            .unwrap_or_else(|err| panic!("clear: {err}"));
        assert!(!store_fixture.store.path().exists());
        assert_eq!(store_fixture.store.clear(), Ok(()));
    }

    #[cfg(unix)]
    #[rstest]
    #[case::fresh_record(false)]
    #[case::world_readable_record(true)]
    fn save_restricts_permissions(store_fixture: StoreFixture, #[case] pre_existing: bool) {
        use std::os::unix::fs::PermissionsExt;

        if pre_existing {
            std::fs::write(store_fixture.store.path(), "{}")
                .unwrap_or_else(|err| panic!("seed state: {err}"));
            std::fs::set_permissions(
                store_fixture.store.path(),
                std::fs::Permissions::from_mode(0o644),
            )
            .unwrap_or_else(|err| panic!("chmod: {err}"));
        }
        let record = LifecycleStateRecord::new(&params(None), &store_fixture.dir);
        store_fixture
            .store
            .save(&record)
            .unwrap_or_else(|err| panic!("save: {err}"));

        let mode = std::fs::metadata(store_fixture.store.path())
            .unwrap_or_else(|err| panic!("metadata: {err}"))
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
