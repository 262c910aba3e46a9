//! Append-only journal in front of a `MemoryStore`
//!
//! Every mutation is applied in memory and then appended as one framed entry
//! while the journal lock is held. A failed append undoes the memory change
//! and truncates any partial entry off the file.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::codec;
use super::format::{
    entry_crc, frame_entry, EntryHeader, EntryKind, JournalHeader, ENTRY_HEADER_SIZE,
    JOURNAL_HEADER_SIZE, MAX_PAYLOAD_SIZE,
};
use super::memory::MemoryStore;
use super::Store;
use crate::record::{CapturedRequest, Endpoint, RequestId};
use crate::{HookError, Result};

/// Outcome of replaying a journal file
#[derive(Debug, Default)]
struct Recovery {
    applied: usize,
    stopped_at: Option<u64>,
}

/// File operations an append relies on
trait AppendTarget: Write {
    fn len(&self) -> io::Result<u64>;
    fn truncate(&self, len: u64) -> io::Result<()>;
    fn sync(&self) -> io::Result<()>;
}

impl AppendTarget for File {
    fn len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&self) -> io::Result<()> {
        self.sync_data()
    }
}

/// Append side of the journal
#[derive(Debug)]
struct JournalWriter<F = File> {
    file: F,
    sync_writes: bool,
    /// Offset of a partial entry that could not be truncated yet
    torn_at: Option<u64>,
}

impl<F: AppendTarget> JournalWriter<F> {
    fn new(file: F, sync_writes: bool) -> Self {
        Self {
            file,
            sync_writes,
            torn_at: None,
        }
    }

    /// Append one entry, or leave the file as it was
    fn append(&mut self, kind: EntryKind, payload: &[u8]) -> Result<()> {
        let framed = frame_entry(kind, payload)?;

        if let Some(offset) = self.torn_at {
            self.file.truncate(offset)?;
            info!("Journal: dropped partial entry at offset {}", offset);
            self.torn_at = None;
        }

        let start = self.file.len()?;
        let written = self
            .file
            .write_all(&framed)
            .and_then(|()| self.file.flush())
            .and_then(|()| if self.sync_writes { self.file.sync() } else { Ok(()) });

        if let Err(e) = written {
            if let Err(undo) = self.file.truncate(start) {
                error!(
                    "Journal: cannot truncate partial entry at offset {}: {}",
                    start, undo
                );
                self.torn_at = Some(start);
            }
            return Err(e.into());
        }
        Ok(())
    }
}

/// Journal-backed store
#[derive(Debug)]
pub struct JournalStore {
    memory: MemoryStore,
    writer: Mutex<JournalWriter>,
    path: PathBuf,
}

impl JournalStore {
    /// Open or create the journal at `path`, recovering its contents
    ///
    /// An existing journal is compacted after recovery, which also drops a
    /// torn or corrupted tail.
    ///
    /// # Errors
    ///
    /// Returns error if the file header is invalid or the file cannot be written
    pub fn open(path: &Path, sync_writes: bool) -> Result<Self> {
        let memory = MemoryStore::new();

        let existing = match fs::read(path) {
            Ok(data) if !data.is_empty() => Some(data),
            Ok(_) => None,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        if let Some(data) = existing {
            let recovery = replay(&data, &memory)?;
            match recovery.stopped_at {
                Some(offset) => warn!(
                    "Journal {:?}: recovered {} entries, discarding {} bytes from offset {}",
                    path,
                    recovery.applied,
                    data.len() as u64 - offset,
                    offset
                ),
                None => info!("Journal {:?}: recovered {} entries", path, recovery.applied),
            }
            write_snapshot(path, &memory)?;
        } else {
            write_snapshot(path, &memory)?;
            info!("Created journal {:?}", path);
        }

        let file = OpenOptions::new().append(true).open(path)?;

        Ok(Self {
            memory,
            writer: Mutex::new(JournalWriter::new(file, sync_writes)),
            path: path.to_path_buf(),
        })
    }

    /// Path of the journal file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, JournalWriter>> {
        self.writer
            .lock()
            .map_err(|_| HookError::Storage("journal lock poisoned".to_string()))
    }

    fn remove_endpoint_locked(&self, writer: &mut JournalWriter, id: &str) -> Result<usize> {
        let (endpoint, requests) = self.memory.take_endpoint(id)?;
        let count = requests.len();

        let appended =
            codec::encode_id(id).and_then(|p| writer.append(EntryKind::EndpointDeleted, &p));
        if let Err(e) = appended {
            // Put everything back
            self.memory.insert_endpoint(endpoint)?;
            for request in requests {
                self.memory.restore_request(request)?;
            }
            return Err(e);
        }
        Ok(count)
    }
}

impl Store for JournalStore {
    fn create_endpoint(
        &self,
        id: &str,
        alias: Option<&str>,
        creator_id: Option<&str>,
        ttl: Duration,
    ) -> Result<Endpoint> {
        let mut writer = self.lock()?;
        let endpoint = self.memory.create_endpoint(id, alias, creator_id, ttl)?;

        let appended = codec::encode_endpoint(&endpoint)
            .and_then(|p| writer.append(EntryKind::EndpointCreated, &p));
        if let Err(e) = appended {
            self.memory.take_endpoint(id)?;
            return Err(e);
        }
        Ok(endpoint)
    }

    fn get_endpoint(&self, id: &str) -> Result<Endpoint> {
        self.memory.get_endpoint(id)
    }

    fn delete_endpoint(&self, id: &str) -> Result<()> {
        let mut writer = self.lock()?;
        let count = self.remove_endpoint_locked(&mut writer, id)?;
        debug!("Deleted endpoint {} with {} requests", id, count);
        Ok(())
    }

    fn list_endpoints(&self, creator_id: Option<&str>, limit: usize) -> Result<Vec<Endpoint>> {
        self.memory.list_endpoints(creator_id, limit)
    }

    fn save_request(&self, request: CapturedRequest) -> Result<CapturedRequest> {
        let mut writer = self.lock()?;
        let saved = self.memory.save_request(request)?;

        let appended = codec::encode_request(&saved)
            .and_then(|p| writer.append(EntryKind::RequestSaved, &p));
        if let Err(e) = appended {
            self.memory.take_request(saved.id)?;
            return Err(e);
        }
        Ok(saved)
    }

    fn get_request(&self, id: RequestId) -> Result<CapturedRequest> {
        self.memory.get_request(id)
    }

    fn get_requests_with_offset(
        &self,
        endpoint_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CapturedRequest>> {
        self.memory.get_requests_with_offset(endpoint_id, limit, offset)
    }

    fn count_requests(&self, endpoint_id: &str) -> Result<usize> {
        self.memory.count_requests(endpoint_id)
    }

    fn delete_request(&self, id: RequestId) -> Result<()> {
        let mut writer = self.lock()?;
        let removed = self.memory.take_request(id)?;

        let payload = codec::encode_request_id(id);
        if let Err(e) = writer.append(EntryKind::RequestDeleted, &payload) {
            self.memory.restore_request(removed)?;
            return Err(e);
        }
        Ok(())
    }

    fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let mut writer = self.lock()?;
        let mut removed = Vec::new();

        for id in self.memory.expired_ids(now) {
            match self.remove_endpoint_locked(&mut writer, &id) {
                Ok(_) => removed.push(id),
                Err(HookError::EndpointNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }
}

/// Apply every intact entry of `data` to `memory`
fn replay(data: &[u8], memory: &MemoryStore) -> Result<Recovery> {
    if data.len() < JOURNAL_HEADER_SIZE {
        return Err(HookError::InvalidFormat(
            "File too small to contain journal header".to_string(),
        ));
    }

    let header: JournalHeader = bytemuck::pod_read_unaligned(&data[..JOURNAL_HEADER_SIZE]);
    header.validate()?;

    let mut recovery = Recovery::default();
    let mut offset = JOURNAL_HEADER_SIZE;

    while offset < data.len() {
        match read_entry(data, offset) {
            Ok((kind, payload)) => {
                if let Err(e) = apply(kind, payload, memory) {
                    warn!("Journal entry at offset {} not applied: {}", offset, e);
                    recovery.stopped_at = Some(offset as u64);
                    break;
                }
                recovery.applied += 1;
                offset += ENTRY_HEADER_SIZE + payload.len();
            }
            Err(e) => {
                warn!("Journal replay stopped: {}", e);
                recovery.stopped_at = Some(offset as u64);
                break;
            }
        }
    }

    Ok(recovery)
}

/// Read and verify the entry starting at `offset`
fn read_entry(data: &[u8], offset: usize) -> Result<(EntryKind, &[u8])> {
    let remaining = data.len() - offset;
    if remaining < ENTRY_HEADER_SIZE {
        return Err(HookError::InvalidFormat(format!(
            "Torn entry header at offset {offset}: {remaining} bytes"
        )));
    }

    let header: EntryHeader =
        bytemuck::pod_read_unaligned(&data[offset..offset + ENTRY_HEADER_SIZE]);

    let kind = EntryKind::from_u8(header.kind).ok_or_else(|| {
        HookError::InvalidFormat(format!("Unknown entry kind {} at offset {offset}", header.kind))
    })?;

    if header.payload_len > MAX_PAYLOAD_SIZE {
        return Err(HookError::InvalidFormat(format!(
            "Entry at offset {offset} claims {} bytes",
            header.payload_len
        )));
    }

    let start = offset + ENTRY_HEADER_SIZE;
    let end = start + header.payload_len as usize;
    if end > data.len() {
        return Err(HookError::InvalidFormat(format!(
            "Torn entry payload at offset {offset}: need {}, have {}",
            header.payload_len,
            data.len() - start
        )));
    }

    let payload = &data[start..end];
    let actual = entry_crc(kind, payload);
    if actual != header.crc {
        return Err(HookError::CorruptedJournal {
            offset: offset as u64,
            expected: header.crc,
            actual,
        });
    }

    Ok((kind, payload))
}

fn apply(kind: EntryKind, payload: &[u8], memory: &MemoryStore) -> Result<()> {
    match kind {
        EntryKind::EndpointCreated => memory.insert_endpoint(codec::decode_endpoint(payload)?),
        EntryKind::EndpointDeleted => {
            let id = codec::decode_id(payload)?;
            ignore_missing(memory.take_endpoint(&id).map(|_| ()))
        }
        EntryKind::RequestSaved => {
            let request = codec::decode_request(payload)?;
            ignore_missing(memory.restore_request(request))
        }
        EntryKind::RequestDeleted => {
            let id = codec::decode_request_id(payload)?;
            ignore_missing(memory.take_request(id).map(|_| ()))
        }
    }
}

/// Entries referring to records already gone are harmless
fn ignore_missing(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_not_found() => {
            debug!("Journal entry refers to missing record: {}", e);
            Ok(())
        }
        other => other,
    }
}

/// Rewrite the journal so it holds exactly the current contents of `memory`
fn write_snapshot(path: &Path, memory: &MemoryStore) -> Result<()> {
    let mut tmp_name = OsString::from(path.as_os_str());
    tmp_name.push(".compact");
    let tmp_path = PathBuf::from(tmp_name);

    let created_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();

    let mut data = Vec::with_capacity(JOURNAL_HEADER_SIZE);
    data.extend_from_slice(bytemuck::bytes_of(&JournalHeader::new(created_at)));

    for endpoint in memory.all_endpoints() {
        data.extend(frame_entry(EntryKind::EndpointCreated, &codec::encode_endpoint(&endpoint)?)?);
    }
    for request in memory.all_requests() {
        data.extend(frame_entry(EntryKind::RequestSaved, &codec::encode_request(&request)?)?);
    }

    let mut tmp = File::create(&tmp_path)?;
    tmp.write_all(&data)?;
    tmp.sync_all()?;
    drop(tmp);

    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::HeaderList;
    use bytes::Bytes;
    use tempfile::TempDir;

    const DAY: Duration = Duration::from_secs(86_400);

    fn capture(endpoint_id: &str, body: &'static [u8]) -> CapturedRequest {
        let mut headers = HeaderList::new();
        headers.append("Content-Type", "application/json");
        CapturedRequest {
            id: 0,
            endpoint_id: endpoint_id.to_string(),
            method: "POST".to_string(),
            path: format!("/h/{endpoint_id}"),
            query: Some("a=1".to_string()),
            remote_addr: "127.0.0.1:1".to_string(),
            headers,
            body: Bytes::from_static(body),
            status_code: 200,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_reopen_recovers_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hooks.journal");

        let (kept, deleted) = {
            let store = JournalStore::open(&path, false).unwrap();
            store.create_endpoint("e1", Some("ci"), Some("b1"), DAY).unwrap();
            store.create_endpoint("e2", None, None, DAY).unwrap();
            let kept = store.save_request(capture("e1", b"\x00\x01binary")).unwrap();
            let deleted = store.save_request(capture("e1", b"gone")).unwrap();
            store.save_request(capture("e2", b"x")).unwrap();
            store.delete_request(deleted.id).unwrap();
            store.delete_endpoint("e2").unwrap();
            (kept, deleted)
        };

        let store = JournalStore::open(&path, false).unwrap();
        let endpoint = store.get_endpoint("e1").unwrap();
        assert_eq!(endpoint.alias.as_deref(), Some("ci"));
        assert_eq!(endpoint.creator_id.as_deref(), Some("b1"));
        assert!(store.get_endpoint("e2").is_err());

        assert_eq!(store.get_request(kept.id).unwrap(), kept);
        assert!(store.get_request(deleted.id).is_err());
        assert_eq!(store.count_requests("e1").unwrap(), 1);

        // Ids keep increasing after recovery
        let next = store.save_request(capture("e1", b"new")).unwrap();
        assert!(next.id > deleted.id);
    }

    #[test]
    fn test_torn_tail_is_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hooks.journal");

        {
            let store = JournalStore::open(&path, true).unwrap();
            store.create_endpoint("e1", None, None, DAY).unwrap();
            store.save_request(capture("e1", b"first")).unwrap();
            store.save_request(capture("e1", b"second")).unwrap();
        }

        // Cut the last entry in half
        let len = fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 5).unwrap();
        drop(file);

        let store = JournalStore::open(&path, false).unwrap();
        assert_eq!(store.count_requests("e1").unwrap(), 1);
        store.save_request(capture("e1", b"third")).unwrap();
        drop(store);

        // The compacted journal accepts appends and stays readable
        let store = JournalStore::open(&path, false).unwrap();
        let bodies: Vec<Bytes> = store
            .get_requests_with_offset("e1", 10, 0)
            .unwrap()
            .into_iter()
            .map(|r| r.body)
            .collect();
        assert_eq!(bodies, [Bytes::from_static(b"third"), Bytes::from_static(b"first")]);
    }

    /// Real journal file whose writes run out of space after `budget` bytes
    struct FlakyFile {
        inner: File,
        budget: Option<usize>,
        truncate_fails: bool,
    }

    impl Write for FlakyFile {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            match self.budget {
                Some(0) => Err(io::Error::other("no space left on device")),
                Some(left) => {
                    let written = self.inner.write(&buf[..buf.len().min(left)])?;
                    self.budget = Some(left - written);
                    Ok(written)
                }
                None => self.inner.write(buf),
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            self.inner.flush()
        }
    }

    impl AppendTarget for FlakyFile {
        fn len(&self) -> io::Result<u64> {
            self.inner.len()
        }

        fn truncate(&self, len: u64) -> io::Result<()> {
            if self.truncate_fails {
                return Err(io::Error::other("truncate refused"));
            }
            self.inner.truncate(len)
        }

        fn sync(&self) -> io::Result<()> {
            self.inner.sync()
        }
    }

    fn saved(id: RequestId, body: &'static [u8]) -> Vec<u8> {
        let mut request = capture("e1", body);
        request.id = id;
        codec::encode_request(&request).unwrap()
    }

    fn bodies(store: &JournalStore) -> Vec<Bytes> {
        store
            .get_requests_with_offset("e1", 10, 0)
            .unwrap()
            .into_iter()
            .map(|r| r.body)
            .collect()
    }

    #[test]
    fn test_failed_append_does_not_hide_later_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hooks.journal");

        {
            let store = JournalStore::open(&path, false).unwrap();
            store.create_endpoint("e1", None, None, DAY).unwrap();
            store.save_request(capture("e1", b"first")).unwrap();
        }
        let len_before = fs::metadata(&path).unwrap().len();

        let file = OpenOptions::new().append(true).open(&path).unwrap();
        let mut writer = JournalWriter::new(
            FlakyFile {
                inner: file,
                budget: Some(10),
                truncate_fails: false,
            },
            false,
        );

        assert!(writer.append(EntryKind::RequestSaved, &saved(10, b"lost")).is_err());
        assert_eq!(fs::metadata(&path).unwrap().len(), len_before);

        writer.file.budget = None;
        writer.append(EntryKind::RequestSaved, &saved(11, b"later")).unwrap();
        drop(writer);

        let store = JournalStore::open(&path, false).unwrap();
        assert_eq!(
            bodies(&store),
            [Bytes::from_static(b"later"), Bytes::from_static(b"first")]
        );
    }

    #[test]
    fn test_partial_entry_dropped_before_next_append() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hooks.journal");

        {
            let store = JournalStore::open(&path, false).unwrap();
            store.create_endpoint("e1", None, None, DAY).unwrap();
        }
        let len_before = fs::metadata(&path).unwrap().len();

        let file = OpenOptions::new().append(true).open(&path).unwrap();
        let mut writer = JournalWriter::new(
            FlakyFile {
                inner: file,
                budget: Some(7),
                truncate_fails: true,
            },
            false,
        );

        assert!(writer.append(EntryKind::RequestSaved, &saved(1, b"lost")).is_err());
        assert_eq!(writer.torn_at, Some(len_before));
        assert_eq!(fs::metadata(&path).unwrap().len(), len_before + 7);

        // Still cannot repair: nothing new is written behind the partial entry
        writer.file.budget = None;
        assert!(writer.append(EntryKind::RequestSaved, &saved(2, b"blocked")).is_err());
        assert_eq!(fs::metadata(&path).unwrap().len(), len_before + 7);

        writer.file.truncate_fails = false;
        writer.append(EntryKind::RequestSaved, &saved(3, b"kept")).unwrap();
        assert_eq!(writer.torn_at, None);
        drop(writer);

        let store = JournalStore::open(&path, false).unwrap();
        assert_eq!(bodies(&store), [Bytes::from_static(b"kept")]);
    }

    #[test]
    fn test_corrupted_entry_stops_replay() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hooks.journal");

        {
            let store = JournalStore::open(&path, false).unwrap();
            store.create_endpoint("e1", None, None, DAY).unwrap();
            store.save_request(capture("e1", b"payload")).unwrap();
        }

        // Flip the last payload byte
        let mut data = fs::read(&path).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xFF;
        fs::write(&path, &data).unwrap();

        let store = JournalStore::open(&path, false).unwrap();
        assert!(store.get_endpoint("e1").is_ok());
        assert_eq!(store.count_requests("e1").unwrap(), 0);
    }

    #[test]
    fn test_foreign_file_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("not-a-journal");
        fs::write(&path, vec![7u8; 64]).unwrap();

        assert!(matches!(
            JournalStore::open(&path, false),
            Err(HookError::InvalidFormat(_))
        ));
        // Left untouched
        assert_eq!(fs::read(&path).unwrap(), vec![7u8; 64]);
    }

    #[test]
    fn test_cleanup_is_journaled() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hooks.journal");

        {
            let store = JournalStore::open(&path, false).unwrap();
            store.create_endpoint("old", None, None, Duration::from_secs(1)).unwrap();
            store.create_endpoint("new", None, None, DAY).unwrap();
            let later = Utc::now() + chrono::Duration::seconds(10);
            assert_eq!(store.cleanup_expired(later).unwrap(), ["old"]);
        }

        let store = JournalStore::open(&path, false).unwrap();
        assert!(store.get_endpoint("old").is_err());
        assert!(store.get_endpoint("new").is_ok());
    }
}
