//! Upload coordination
//!
//! Files selected on an upload input are tracked as entries of a session.
//! A batch groups the sessions of one form that go through preflight
//! together, and carries what to do once every entry has been transferred.

use std::collections::HashMap;

use livelink_core::{
    ComponentId, FileInfo, NodeId, RefToken, TransferEntry, UploadTransfer, ViewId,
};
use serde_json::{Map, Value, json};

/// Identifier of an upload batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId(u64);

/// Lifecycle of one file entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    /// Selected, not yet sent for preflight
    Selected,
    Preflighting,
    Transferring,
}

/// One selected file
#[derive(Debug, Clone, PartialEq)]
pub struct UploadEntry {
    pub entry_ref: String,
    pub file: FileInfo,
    pub progress: u8,
    pub status: EntryStatus,
}

impl UploadEntry {
    fn preflight_payload(&self) -> Value {
        json!({
            "ref": self.entry_ref,
            "name": self.file.name,
            "size": self.file.size,
            "type": self.file.mime,
            "last_modified": self.file.last_modified,
        })
    }
}

/// Files tracked for one upload input
#[derive(Debug, Clone, PartialEq)]
pub struct UploadSession {
    pub input: NodeId,
    /// Form field name of the input
    pub name: String,
    pub upload_ref: String,
    /// Join generation the files were selected in
    pub join_count: u32,
    pub entries: Vec<UploadEntry>,
    batch: Option<BatchId>,
}

impl UploadSession {
    fn has_status(&self, status: EntryStatus) -> bool {
        self.entries.iter().any(|e| e.status == status)
    }

    fn in_flight(&self) -> bool {
        self.has_status(EntryStatus::Preflighting) || self.has_status(EntryStatus::Transferring)
    }
}

/// What runs once a batch has fully transferred
#[derive(Debug, Clone, PartialEq)]
pub enum UploadFollowUp {
    /// Push the form submission that was waiting for its files
    Submit { event: String },
    /// Release the auto-upload lock and run any scheduled submit
    AutoUpload { input: NodeId },
}

/// A group of inputs uploading under one lock token
#[derive(Debug, Clone, PartialEq)]
pub struct UploadBatch {
    pub form: NodeId,
    pub token: RefToken,
    pub cid: Option<ComponentId>,
    pub inputs: Vec<NodeId>,
    pub follow_up: UploadFollowUp,
}

/// Result of applying a preflight reply
#[derive(Debug, Clone, PartialEq)]
pub enum PreflightOutcome {
    /// Entries may be transferred
    Authorized(UploadTransfer),
    /// The server refused an entry of this input; the batch lock is released
    /// while other inputs keep uploading
    Rejected {
        entry_ref: String,
        reason: String,
        batch: Option<UploadBatch>,
    },
    /// No session for the input any more
    Unknown,
}

/// Upload sessions and batches of one view
#[derive(Debug, Default)]
pub struct UploadCoordinator {
    sessions: HashMap<NodeId, UploadSession>,
    batches: HashMap<BatchId, UploadBatch>,
    next_entry: u64,
    next_batch: u64,
}

impl UploadCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self, input: NodeId) -> Option<&UploadSession> {
        self.sessions.get(&input)
    }

    /// Track the files currently selected on `input`
    ///
    /// A `multiple` input accumulates new files; otherwise the selection
    /// replaces entries that have not started uploading.
    pub fn track_files(
        &mut self,
        input: NodeId,
        name: &str,
        upload_ref: &str,
        multiple: bool,
        files: Vec<FileInfo>,
        join_count: u32,
    ) {
        let session = self.sessions.entry(input).or_insert_with(|| UploadSession {
            input,
            name: name.to_string(),
            upload_ref: upload_ref.to_string(),
            join_count,
            entries: Vec::new(),
            batch: None,
        });
        if session.in_flight() {
            return;
        }
        session.join_count = join_count;

        let unchanged = session.entries.len() == files.len()
            && session.entries.iter().zip(&files).all(|(e, f)| &e.file == f);
        if unchanged {
            return;
        }
        if !multiple {
            session.entries.clear();
        }
        for file in files {
            if session.entries.iter().any(|e| e.file == file) {
                continue;
            }
            session.entries.push(UploadEntry {
                entry_ref: self.next_entry.to_string(),
                file,
                progress: 0,
                status: EntryStatus::Selected,
            });
            self.next_entry += 1;
        }
    }

    /// Upload metadata sent with a change event of `input`
    pub fn serialize_uploads(&self, input: NodeId) -> Value {
        let mut out = Map::new();
        if let Some(session) = self.sessions.get(&input) {
            let entries: Vec<Value> = session
                .entries
                .iter()
                .map(|entry| {
                    json!({
                        "path": session.name,
                        "ref": entry.entry_ref,
                        "name": entry.file.name,
                        "type": entry.file.mime,
                        "size": entry.file.size,
                    })
                })
                .collect();
            out.insert(session.upload_ref.clone(), Value::Array(entries));
        }
        Value::Object(out)
    }

    /// Inputs of `inputs` with files not yet sent for preflight
    pub fn awaiting_preflight(&self, inputs: &[NodeId]) -> Vec<NodeId> {
        inputs
            .iter()
            .copied()
            .filter(|input| {
                self.sessions
                    .get(input)
                    .is_some_and(|s| s.has_status(EntryStatus::Selected))
            })
            .collect()
    }

    /// True if any of `inputs` is preflighting or transferring
    pub fn in_progress(&self, inputs: &[NodeId]) -> bool {
        inputs
            .iter()
            .any(|input| self.sessions.get(input).is_some_and(UploadSession::in_flight))
    }

    /// Send the selected files of `inputs` to preflight under `token`
    pub fn begin_batch(
        &mut self,
        form: NodeId,
        token: RefToken,
        cid: Option<ComponentId>,
        inputs: Vec<NodeId>,
        follow_up: UploadFollowUp,
    ) -> BatchId {
        let id = BatchId(self.next_batch);
        self.next_batch += 1;
        for input in &inputs {
            if let Some(session) = self.sessions.get_mut(input) {
                session.batch = Some(id);
                for entry in &mut session.entries {
                    if entry.status == EntryStatus::Selected {
                        entry.status = EntryStatus::Preflighting;
                    }
                }
            }
        }
        self.batches.insert(
            id,
            UploadBatch {
                form,
                token,
                cid,
                inputs,
                follow_up,
            },
        );
        id
    }

    /// Payload of the preflight request for `input`
    pub fn preflight_payload(&self, input: NodeId, cid: Option<ComponentId>) -> Option<Value> {
        let session = self.sessions.get(&input)?;
        let entries: Vec<Value> = session
            .entries
            .iter()
            .filter(|e| e.status == EntryStatus::Preflighting)
            .map(UploadEntry::preflight_payload)
            .collect();
        Some(json!({
            "ref": session.upload_ref,
            "entries": entries,
            "cid": cid,
        }))
    }

    /// Apply the preflight reply for `input`
    pub fn apply_preflight(&mut self, view: &ViewId, input: NodeId, reply: &Map<String, Value>) -> PreflightOutcome {
        let Some(session) = self.sessions.get_mut(&input) else {
            return PreflightOutcome::Unknown;
        };

        if let Some(error) = reply.get("error") {
            let (entry_ref, reason) = match error.as_array().map(Vec::as_slice) {
                Some([entry_ref, reason, ..]) => (value_text(entry_ref), value_text(reason)),
                _ => (String::new(), value_text(error)),
            };
            let batch_id = session.batch;
            session
                .entries
                .retain(|e| e.status != EntryStatus::Preflighting);
            if session.entries.is_empty() {
                self.sessions.remove(&input);
            }
            let batch = batch_id.and_then(|id| self.abandon(id));
            return PreflightOutcome::Rejected {
                entry_ref,
                reason,
                batch,
            };
        }

        let metas = reply.get("entries").and_then(Value::as_object);
        let mut entries = Vec::new();
        for entry in &mut session.entries {
            if entry.status != EntryStatus::Preflighting {
                continue;
            }
            entry.status = EntryStatus::Transferring;
            entries.push(TransferEntry {
                entry_ref: entry.entry_ref.clone(),
                file: entry.file.clone(),
                meta: metas
                    .and_then(|m| m.get(&entry.entry_ref))
                    .cloned()
                    .unwrap_or(Value::Null),
            });
        }
        PreflightOutcome::Authorized(UploadTransfer {
            view: view.clone(),
            input,
            join_count: session.join_count,
            config: reply.get("config").cloned().unwrap_or(Value::Null),
            entries,
        })
    }

    /// Record progress of an entry
    ///
    /// Finished entries stop being tracked. Returns the batch of `input` once
    /// none of its inputs has anything in flight; a batch completes once.
    pub fn progress(&mut self, input: NodeId, entry_ref: &str, progress: u8) -> Option<UploadBatch> {
        let session = self.sessions.get_mut(&input)?;
        let batch = session.batch;
        if let Some(entry) = session.entries.iter_mut().find(|e| e.entry_ref == entry_ref) {
            entry.progress = progress.min(100);
        }
        if progress >= 100 {
            session.entries.retain(|e| e.entry_ref != entry_ref);
            if session.entries.is_empty() {
                self.sessions.remove(&input);
            }
        }

        let id = batch?;
        let done = self
            .batches
            .get(&id)
            .is_some_and(|b| !self.in_progress(&b.inputs));
        if done { self.batches.remove(&id) } else { None }
    }

    /// Abandon the transfer of `input`
    ///
    /// Returns the batch the input belonged to, whose lock must be released.
    /// Other inputs of the batch keep their entries.
    pub fn fail(&mut self, input: NodeId) -> Option<UploadBatch> {
        let session = self.sessions.remove(&input)?;
        session.batch.and_then(|id| self.abandon(id))
    }

    /// Upload inputs with in-flight entries selected in generation `join_count`
    pub fn in_flight_inputs(&self, join_count: u32) -> Vec<NodeId> {
        let mut inputs: Vec<NodeId> = self
            .sessions
            .values()
            .filter(|s| s.join_count == join_count && s.in_flight())
            .map(|s| s.input)
            .collect();
        inputs.sort();
        inputs
    }

    /// Drop what an earlier join left in flight
    ///
    /// In-flight sessions are removed and every batch is abandoned, since no
    /// report or reply of the old channel can reach them. Files still only
    /// selected carry over into generation `join_count`. Returns the inputs
    /// that were transferring and the abandoned batches.
    pub fn supersede(&mut self, join_count: u32) -> (Vec<NodeId>, Vec<UploadBatch>) {
        let mut stale: Vec<NodeId> = self
            .sessions
            .values()
            .filter(|s| s.in_flight())
            .map(|s| s.input)
            .collect();
        stale.sort();

        let mut transferring = Vec::new();
        for input in stale {
            if let Some(session) = self.sessions.remove(&input) {
                if session.has_status(EntryStatus::Transferring) {
                    transferring.push(input);
                }
            }
        }
        for session in self.sessions.values_mut() {
            session.join_count = join_count;
            session.batch = None;
        }
        let mut batches: Vec<(BatchId, UploadBatch)> = self.batches.drain().collect();
        batches.sort_by_key(|(id, _)| id.0);
        (transferring, batches.into_iter().map(|(_, batch)| batch).collect())
    }

    /// Forget an input that left the document
    pub fn remove_input(&mut self, input: NodeId) -> bool {
        self.sessions.remove(&input).is_some()
    }

    /// Drop every session and batch
    pub fn clear(&mut self) -> Vec<UploadBatch> {
        self.sessions.clear();
        self.batches.drain().map(|(_, batch)| batch).collect()
    }

    fn abandon(&mut self, id: BatchId) -> Option<UploadBatch> {
        let batch = self.batches.remove(&id)?;
        for input in &batch.inputs {
            if let Some(session) = self.sessions.get_mut(input) {
                session.batch = None;
            }
        }
        Some(batch)
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INPUT: NodeId = NodeId(10);
    const OTHER: NodeId = NodeId(11);
    const FORM: NodeId = NodeId(1);

    fn avatar() -> FileInfo {
        FileInfo::new("me.png", 2048, "image/png")
    }

    fn tracked() -> UploadCoordinator {
        let mut uploads = UploadCoordinator::new();
        uploads.track_files(INPUT, "avatar", "phx-up-1", false, vec![avatar()], 1);
        uploads
    }

    #[test]
    fn test_track_and_serialize() {
        let uploads = tracked();
        let serialized = uploads.serialize_uploads(INPUT);
        assert_eq!(serialized["phx-up-1"][0]["path"], "avatar");
        assert_eq!(serialized["phx-up-1"][0]["name"], "me.png");
        assert_eq!(uploads.awaiting_preflight(&[INPUT, OTHER]), vec![INPUT]);
        assert!(!uploads.in_progress(&[INPUT]));
    }

    #[test]
    fn test_retracking_same_files_keeps_refs() {
        let mut uploads = tracked();
        let before = uploads.session(INPUT).unwrap().entries[0].entry_ref.clone();
        uploads.track_files(INPUT, "avatar", "phx-up-1", false, vec![avatar()], 1);
        assert_eq!(uploads.session(INPUT).unwrap().entries[0].entry_ref, before);
    }

    #[test]
    fn test_preflight_authorizes_transfer() {
        let mut uploads = tracked();
        uploads.begin_batch(FORM, RefToken(4), None, vec![INPUT], UploadFollowUp::Submit { event: "save".into() });
        assert!(uploads.in_progress(&[INPUT]));

        let payload = uploads.preflight_payload(INPUT, Some(ComponentId(2))).unwrap();
        assert_eq!(payload["ref"], "phx-up-1");
        assert_eq!(payload["cid"], 2);
        let entry_ref = payload["entries"][0]["ref"].as_str().unwrap().to_string();

        let reply = json!({"config": {"chunk_size": 64000}, "entries": {(entry_ref.clone()): {"token": "t"}}});
        let outcome = uploads.apply_preflight(&ViewId::new("v"), INPUT, reply.as_object().unwrap());
        let PreflightOutcome::Authorized(transfer) = outcome else {
            panic!("expected authorization");
        };
        assert_eq!(transfer.join_count, 1);
        assert_eq!(transfer.entries[0].meta, json!({"token": "t"}));

        assert_eq!(uploads.progress(INPUT, &entry_ref, 50), None);
        let batch = uploads.progress(INPUT, &entry_ref, 100).unwrap();
        assert_eq!(batch.token, RefToken(4));
        assert!(uploads.session(INPUT).is_none());
    }

    #[test]
    fn test_preflight_rejection_abandons_batch() {
        let mut uploads = tracked();
        uploads.begin_batch(FORM, RefToken(7), None, vec![INPUT], UploadFollowUp::AutoUpload { input: INPUT });

        let reply = json!({"error": ["0", "too_large"]});
        let outcome = uploads.apply_preflight(&ViewId::new("v"), INPUT, reply.as_object().unwrap());
        match outcome {
            PreflightOutcome::Rejected { entry_ref, reason, batch } => {
                assert_eq!(entry_ref, "0");
                assert_eq!(reason, "too_large");
                assert_eq!(batch.unwrap().token, RefToken(7));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(!uploads.in_progress(&[INPUT]));
    }

    #[test]
    fn test_batch_completes_once_for_all_inputs() {
        let mut uploads = tracked();
        uploads.track_files(OTHER, "docs", "phx-up-2", false, vec![FileInfo::new("a.txt", 1, "text/plain")], 1);
        uploads.begin_batch(FORM, RefToken(1), None, vec![INPUT, OTHER], UploadFollowUp::Submit { event: "save".into() });

        for input in [INPUT, OTHER] {
            let reply = json!({"config": {}, "entries": {}});
            uploads.apply_preflight(&ViewId::new("v"), input, reply.as_object().unwrap());
        }
        let first = uploads.session(INPUT).unwrap().entries[0].entry_ref.clone();
        let second = uploads.session(OTHER).unwrap().entries[0].entry_ref.clone();

        assert!(uploads.progress(INPUT, &first, 100).is_none());
        assert!(uploads.progress(OTHER, &second, 100).is_some());
        assert!(uploads.progress(OTHER, &second, 100).is_none());
    }

    #[test]
    fn test_fail_releases_batch() {
        let mut uploads = tracked();
        uploads.begin_batch(FORM, RefToken(2), None, vec![INPUT], UploadFollowUp::AutoUpload { input: INPUT });
        assert_eq!(uploads.in_flight_inputs(1), vec![INPUT]);
        assert_eq!(uploads.in_flight_inputs(2), Vec::<NodeId>::new());

        let batch = uploads.fail(INPUT).unwrap();
        assert_eq!(batch.token, RefToken(2));
        assert!(uploads.session(INPUT).is_none());
    }

    #[test]
    fn test_supersede_drops_previous_join_transfers() {
        let mut uploads = tracked();
        uploads.track_files(OTHER, "docs", "phx-up-2", false, vec![FileInfo::new("a.txt", 1, "text/plain")], 1);
        uploads.begin_batch(FORM, RefToken(3), None, vec![INPUT], UploadFollowUp::Submit { event: "save".into() });
        let reply = json!({"config": {}, "entries": {}});
        uploads.apply_preflight(&ViewId::new("v"), INPUT, reply.as_object().unwrap());

        let (transferring, batches) = uploads.supersede(2);
        assert_eq!(transferring, vec![INPUT]);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].token, RefToken(3));

        assert!(uploads.session(INPUT).is_none());
        assert!(!uploads.in_progress(&[INPUT, OTHER]));
        assert_eq!(uploads.awaiting_preflight(&[INPUT, OTHER]), vec![OTHER]);
        assert_eq!(uploads.session(OTHER).unwrap().join_count, 2);
    }
}
