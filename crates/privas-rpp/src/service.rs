//! What the RPP does with each message.

use crate::config::Config;
use crate::extract::{ExtractRequest, ReferenceExtractor};
use crate::launcher::TpsLauncher;
use crate::store::{self, SessionStore, StoreError};
use privas_core::handoff::{SealedSubmission, issue_salt};
use privas_core::payload;
use privas_core::status::{RppEvent, RppState, RppStatus, TpStatus};
use privas_core::wire::Framing;
use privas_core::{
    AckClientData, AskSession, Dataset, Encryptor, Message, MessageError, PublicKey, Salt,
    SendClientData, SendResults, SendRppConfiguration, SendRppStatus, SendSession, SendTpsStatus,
    SessionId,
};
use privas_tps::JobInputs;
use privas_tps::job::write_atomic;
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Session parameters kept next to the session, as the client sent them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub dataset: String,
    pub gnomad_version: String,
    pub max_af: f64,
    pub subpopulation: String,
    pub max_af_subpop: f64,
    pub min_csq: String,
    pub limit_to_snvs: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bed_file: Option<String>,
    pub qc_param: String,
}

impl TryFrom<&AskSession> for SessionRequest {
    type Error = MessageError;

    fn try_from(ask: &AskSession) -> Result<Self, Self::Error> {
        Ok(Self {
            dataset: ask.dataset.clone(),
            gnomad_version: ask.gnomad_version.clone(),
            max_af: ask.max_af_value()?,
            subpopulation: ask.subpopulation.clone(),
            max_af_subpop: ask.max_af_subpop_value()?,
            min_csq: ask.min_csq.clone(),
            limit_to_snvs: ask.limit_to_snvs_value()?,
            bed_file: Some(ask.bed_file.clone()).filter(|b| !b.is_empty()),
            qc_param: ask.qc_param.clone(),
        })
    }
}

impl SessionRequest {
    fn extract_request(&self) -> ExtractRequest {
        ExtractRequest {
            dataset: self.dataset.clone(),
            max_af: self.max_af,
            limit_to_snvs: self.limit_to_snvs,
        }
    }
}

/// The RPP: session store plus its collaborators.
pub struct Rpp {
    config: Config,
    store: SessionStore,
    extractor: Arc<dyn ReferenceExtractor>,
    launcher: Arc<dyn TpsLauncher>,
    enc: Arc<dyn Encryptor>,
}

impl Rpp {
    pub fn new(
        config: Config,
        extractor: Arc<dyn ReferenceExtractor>,
        launcher: Arc<dyn TpsLauncher>,
        enc: Arc<dyn Encryptor>,
    ) -> Self {
        let store = SessionStore::new(&config.data_dir, config.session_ttl());
        Self {
            config,
            store,
            extractor,
            launcher,
            enc,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn framing(&self) -> Framing {
        Framing::new(self.config.block_size)
    }

    /// Answer one request. Failures become `SendError` replies.
    pub async fn handle(self: &Arc<Self>, request: Message) -> Message {
        let kind = request.kind();
        let reply = match request {
            Message::AskRppConfiguration(_) => self.configuration().await,
            Message::AskSession(ask) => self.open_session(&ask).await,
            Message::SendClientData(data) => self.receive_client_data(&data).await,
            Message::AskMonitor(ask) => match ask.session() {
                Ok(id) => Ok(SendRppStatus::new(&id, &self.monitor(&id).await).into()),
                Err(e) => Err(e.to_string()),
            },
            Message::SendTpsStatus(push) => self.receive_tps_status(&push).await,
            Message::AskResults(ask) => match ask.session() {
                Ok(id) => self.results(&id).await,
                Err(e) => Err(e.to_string()),
            },
            other => Err(format!("unexpected message {}", other.kind())),
        };
        reply.unwrap_or_else(|e| {
            tracing::debug!(request = %kind, error = %e, "request refused");
            Message::error(e)
        })
    }

    /// List datasets off the runtime threads; the extractor touches disk.
    async fn datasets(&self) -> Result<Vec<Dataset>, String> {
        let extractor = self.extractor.clone();
        tokio::task::spawn_blocking(move || extractor.datasets())
            .await
            .map_err(|e| format!("cannot list datasets: {e}"))?
            .map_err(|e| format!("cannot list datasets: {e}"))
    }

    async fn configuration(&self) -> Result<Message, String> {
        let datasets = self.datasets().await?;
        SendRppConfiguration::new(&datasets, &self.config.tps_name)
            .map(Message::from)
            .map_err(|e| e.to_string())
    }

    async fn open_session(self: &Arc<Self>, ask: &AskSession) -> Result<Message, String> {
        let request = SessionRequest::try_from(ask).map_err(|e| e.to_string())?;
        let datasets = self.datasets().await?;
        if !datasets.iter().any(|d| d.name == request.dataset) {
            return Err(format!("unknown dataset {:?}", request.dataset));
        }
        let client_key = PublicKey::from_pem(ask.client_public_key.clone());
        let (salt, encrypted_hash_key) = issue_salt(self.enc.as_ref(), &client_key)
            .map_err(|e| format!("cannot use client public key: {e}"))?;

        let (id, _) = self.store.create().await.map_err(|e| e.to_string())?;
        let saved = async {
            let json = serde_json::to_string_pretty(&request).map_err(io::Error::other)?;
            self.store.write_file(&id, store::REQUEST, &json).await?;
            self.store.write_file(&id, store::SALT, &salt.to_hex()).await?;
            Ok::<_, StoreError>(())
        };
        if let Err(e) = saved.await {
            self.fail(&id, format!("cannot store session: {e}")).await;
            return Err(e.to_string());
        }

        tracing::info!(
            session = %id,
            dataset = %request.dataset,
            max_af = request.max_af,
            "session opened"
        );
        let rpp = self.clone();
        let extraction_id = id.clone();
        tokio::spawn(async move { rpp.extract(extraction_id, request, salt).await });

        Ok(SendSession {
            session_id: id.to_string(),
            encrypted_hash_key,
            third_party_public_key: self.launcher.public_key().as_pem().to_string(),
            bed_file: ask.bed_file.clone(),
        }
        .into())
    }

    /// Extract the reference side of a session and report it.
    async fn extract(self: Arc<Self>, id: SessionId, request: SessionRequest, salt: Salt) {
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let extractor = self.extractor.clone();
        let extract_request = request.extract_request();
        let extraction = tokio::task::spawn_blocking(move || {
            extractor.extract(&extract_request, &salt, &mut |eta: String| {
                let _ = progress_tx.send(eta);
            })
        });
        while let Some(eta) = progress_rx.recv().await {
            if let Err(e) = self
                .store
                .transition(&id, RppEvent::ExtractionProgress { eta })
                .await
            {
                tracing::warn!(session = %id, error = %e, "cannot record extraction progress");
            }
        }

        let records = match extraction.await {
            Ok(Ok(records)) => records,
            Ok(Err(e)) => return self.fail(&id, format!("reference extraction failed: {e}")).await,
            Err(e) => return self.fail(&id, format!("reference extraction aborted: {e}")).await,
        };
        if records.is_empty() {
            if let Err(e) = self.store.transition(&id, RppEvent::ExtractionEmpty).await {
                tracing::warn!(session = %id, error = %e, "cannot record empty extraction");
            }
            return;
        }
        let reference = payload::encode_records(&records);
        if let Err(e) = self.store.write_file(&id, store::REFERENCE, &reference).await {
            return self.fail(&id, format!("cannot store reference: {e}")).await;
        }
        self.advance(&id, RppEvent::ExtractionComplete).await;
    }

    async fn receive_client_data(&self, data: &SendClientData) -> Result<Message, String> {
        let id = data.session().map_err(|e| e.to_string())?;
        let status = self.store.status(&id).await;
        match status.state {
            RppState::NoSession => return Err(format!("no such session: {id}")),
            state if state.is_terminal() => return Err(format!("session is {state}")),
            _ => {}
        }

        let first = self
            .store
            .write_file_once(&id, store::CLIENT_ALGORITHM, &data.algorithm)
            .await
            .map_err(|e| e.to_string())?;
        if !first {
            return Err(format!("client data already received for session {id}"));
        }
        let files = [
            (store::CLIENT_AES_KEY, &data.encrypted_aes_key),
            (store::CLIENT_DATA, &data.encrypted_client_data),
            (store::CLIENT_EXCLUDED, &data.encrypted_excluded_variants),
        ];
        for (name, contents) in files {
            if let Err(e) = self.store.write_file(&id, name, contents).await {
                self.fail(&id, format!("cannot store client data: {e}")).await;
                return Err(e.to_string());
            }
        }
        tracing::info!(
            session = %id,
            bytes = data.encrypted_client_data.len(),
            "client data received"
        );

        self.advance(&id, RppEvent::ClientDataReceived).await;
        Ok(AckClientData {
            session_id: id.to_string(),
        }
        .into())
    }

    /// Apply an event and launch the TPS job if it moved the session into
    /// TPS_SENDING.
    async fn advance(&self, id: &SessionId, event: RppEvent) {
        match self.store.transition(id, event).await {
            Ok((previous, next))
                if next.state == RppState::TpsSending && previous.state != RppState::TpsSending =>
            {
                if let Err(e) = self.launch(id).await {
                    self.fail(id, format!("cannot start TPS job: {e}")).await;
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(session = %id, error = %e, "cannot record session event"),
        }
    }

    async fn launch(&self, id: &SessionId) -> io::Result<()> {
        let files = &self.store;
        let inputs = JobInputs {
            session: id.clone(),
            sealed: SealedSubmission {
                encrypted_aes_key: files.read_file(id, store::CLIENT_AES_KEY).await?,
                encrypted_client_data: files.read_file(id, store::CLIENT_DATA).await?,
                encrypted_excluded_variants: files.read_file(id, store::CLIENT_EXCLUDED).await?,
            },
            algorithm: files.read_file(id, store::CLIENT_ALGORITHM).await?,
            reference: files.read_file(id, store::REFERENCE).await?,
        };
        let job = self.store.job_dir(id);
        job.write_inputs(&inputs).await?;
        self.launcher.launch(job)?;
        tracing::info!(session = %id, "TPS job launched");
        Ok(())
    }

    async fn fail(&self, id: &SessionId, details: String) {
        tracing::warn!(session = %id, error = %details, "session failed");
        if let Err(e) = self.store.transition(id, RppEvent::Fault { details }).await {
            tracing::warn!(session = %id, error = %e, "cannot record session failure");
        }
    }

    /// Current status, refreshed from the TPS artifact while the job runs.
    ///
    /// Reads the artifact once; a missing or broken artifact is recorded and
    /// the next poll tries again.
    pub async fn monitor(&self, id: &SessionId) -> RppStatus {
        let status = self.store.status(id).await;
        if !status.state.is_tps_phase() {
            return status;
        }
        match self.store.job_dir(id).read_status().await {
            Ok(line) => self.relay(id, &TpStatus::parse(&line)).await,
            // job not queued yet
            Err(e)
                if e.kind() == io::ErrorKind::NotFound && status.state == RppState::TpsSending =>
            {
                status
            }
            Err(e) => {
                let event = RppEvent::TpsUnreachable {
                    details: e.to_string(),
                };
                self.transition_or(id, event, status).await
            }
        }
    }

    /// Fold one TPS observation into the session, staging results while it
    /// sits in TPS_DONE.
    ///
    /// Staging is not tied to the edge into TPS_DONE: a session persisted as
    /// TPS_DONE before a restart still reaches its results on the next poll.
    async fn relay(&self, id: &SessionId, tps: &TpStatus) -> RppStatus {
        let current = self.store.status(id).await;
        let next = match self.store.transition(id, RppEvent::from_tps(tps)).await {
            Ok((_, next)) => next,
            Err(e) => {
                tracing::warn!(session = %id, error = %e, "cannot relay TPS status");
                return current;
            }
        };
        if next.state != RppState::TpsDone {
            return next;
        }
        let staged = async {
            let results = self.store.job_dir(id).read_results().await?;
            self.store.write_file(id, store::RESULTS, &results).await?;
            Ok::<_, StoreError>(())
        };
        let event = match staged.await {
            Ok(()) => RppEvent::ResultsStaged,
            Err(e) => RppEvent::Fault {
                details: format!("cannot stage results: {e}"),
            },
        };
        self.transition_or(id, event, next).await
    }

    async fn transition_or(
        &self,
        id: &SessionId,
        event: RppEvent,
        fallback: RppStatus,
    ) -> RppStatus {
        match self.store.transition(id, event).await {
            Ok((_, next)) => next,
            Err(e) => {
                tracing::warn!(session = %id, error = %e, "cannot record session event");
                fallback
            }
        }
    }

    async fn receive_tps_status(&self, push: &SendTpsStatus) -> Result<Message, String> {
        let id = push.session().map_err(|e| e.to_string())?;
        let status = self.store.status(&id).await;
        if status.state == RppState::NoSession {
            return Err(format!("no such session: {id}"));
        }
        if !status.state.is_tps_phase() {
            return Ok(SendRppStatus::new(&id, &status).into());
        }
        let tps = push.tp_status();
        let job = self.store.job_dir(&id);
        let written = async {
            tokio::fs::create_dir_all(job.path()).await?;
            write_atomic(&job.status_path(), &tps.to_string()).await
        };
        if let Err(e) = written.await {
            tracing::warn!(session = %id, error = %e, "cannot record pushed TPS status");
        }
        Ok(SendRppStatus::new(&id, &self.relay(&id, &tps).await).into())
    }

    async fn results(&self, id: &SessionId) -> Result<Message, String> {
        let status = self.store.status(id).await;
        if status.state != RppState::ResultsAvailable {
            return Err(format!("results not available, session is {}", status.state));
        }
        let encrypted_results = self
            .store
            .read_file(id, store::RESULTS)
            .await
            .map_err(|e| format!("cannot read results: {e}"))?;
        if encrypted_results.is_empty() {
            return Err("results are empty".to_string());
        }
        Ok(SendResults {
            session_id: id.to_string(),
            encrypted_results,
        }
        .into())
    }

    /// Expire stale sessions.
    pub async fn sweep(&self) -> Result<Vec<SessionId>, StoreError> {
        self.store.sweep(privas_core::now_millis()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::TsvExtractor;
    use crate::launcher::LocalLauncher;
    use privas_core::handoff::{ClientKeys, open_results, seal_submission};
    use privas_core::payload::VariantRecord;
    use privas_core::status::TpsState;
    use privas_core::{AskMonitor, AskResults, OpensslEncryptor};
    use std::time::Duration;

    const FREX: &str = "# French exomes\n\
        1-1000-A-G\tGENE1\t0.001\tmissense_variant\t0,1,0\n\
        2-800-G-A\tGENE2\t0.01\tstop_gained\t0,0,1\n\
        3-900-C-T\tGENE3\t0.4\tsynonymous_variant\t1,1,1\n";

    struct Harness {
        _dir: tempfile::TempDir,
        rpp: Arc<Rpp>,
        enc: OpensslEncryptor,
    }

    async fn harness_with(datasets: &str) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let config = Config {
            data_dir: root.join("sessions"),
            datasets_dir: root.join("datasets"),
            tps_dir: root.join("tps"),
            tps_name: "test-tps".into(),
            rsa_bits: 1024,
            ..Config::default()
        };
        std::fs::create_dir_all(&config.datasets_dir).unwrap();
        std::fs::write(config.datasets_dir.join("FrEx.tsv"), datasets).unwrap();
        let enc = OpensslEncryptor::new(1024);
        let launcher = LocalLauncher::from_dir(&config.tps_dir, Arc::new(enc), 1)
            .await
            .unwrap();
        let extractor = TsvExtractor::new(&config.datasets_dir, 1);
        let rpp = Rpp::new(config, Arc::new(extractor), Arc::new(launcher), Arc::new(enc));
        Harness {
            _dir: dir,
            rpp: Arc::new(rpp),
            enc,
        }
    }

    fn ask_session(keys: &ClientKeys, dataset: &str) -> Message {
        AskSession {
            client_public_key: keys.public_key().as_pem().into(),
            dataset: dataset.into(),
            gnomad_version: "2.1.1".into(),
            max_af: "0.01".into(),
            subpopulation: "NFE".into(),
            max_af_subpop: "0.01".into(),
            min_csq: "missense_variant".into(),
            limit_to_snvs: "true".into(),
            bed_file: String::new(),
            qc_param: "{}".into(),
        }
        .into()
    }

    async fn wait_for(rpp: &Rpp, id: &SessionId, done: impl Fn(RppState) -> bool) -> RppStatus {
        for _ in 0..500 {
            let status = rpp.monitor(id).await;
            if done(status.state) {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("session {id} stuck at {}", rpp.monitor(id).await.state);
    }

    #[tokio::test]
    async fn configuration_lists_datasets() {
        let h = harness_with(FREX).await;
        let ask = Message::from(privas_core::AskRppConfiguration {});
        let Message::SendRppConfiguration(config) = h.rpp.handle(ask).await else {
            panic!("expected configuration");
        };
        assert_eq!(config.tps_name, "test-tps");
        assert_eq!(config.dataset_list().unwrap()[0].name, "FrEx");
    }

    #[tokio::test]
    async fn unknown_dataset_is_refused() {
        let h = harness_with(FREX).await;
        let keys = ClientKeys::generate(&h.enc).unwrap();
        let reply = h.rpp.handle(ask_session(&keys, "GnomAD")).await;
        assert!(matches!(reply, Message::SendError(e) if e.error_message.contains("GnomAD")));
    }

    #[tokio::test]
    async fn session_runs_to_results() {
        let h = harness_with(FREX).await;
        let keys = ClientKeys::generate(&h.enc).unwrap();
        let Message::SendSession(session) = h.rpp.handle(ask_session(&keys, "FrEx")).await else {
            panic!("expected session");
        };
        let id = session.session().unwrap();
        let salt = keys.open_salt(&h.enc, &session.encrypted_hash_key).unwrap();
        let tps_key = PublicKey::from_pem(session.third_party_public_key);

        let records = vec![
            VariantRecord::new("1-1000-A-G", "GENE1", vec![1, 1]),
            VariantRecord::new("2-800-G-A", "GENE2", vec![0, 1]),
        ];
        let (key, sealed) = seal_submission(&h.enc, &tps_key, &salt, &records, &[]).unwrap();
        let data = SendClientData {
            session_id: id.to_string(),
            encrypted_aes_key: sealed.encrypted_aes_key,
            encrypted_client_data: sealed.encrypted_client_data,
            encrypted_excluded_variants: sealed.encrypted_excluded_variants,
            algorithm: privas_tps::CARRIER_COUNT.into(),
        };
        let reply = h.rpp.handle(data.clone().into()).await;
        assert!(matches!(reply, Message::AckClientData(_)));

        // a second submission is refused
        let again = h.rpp.handle(data.into()).await;
        assert!(matches!(again, Message::SendError(_)));

        wait_for(&h.rpp, &id, |s| s.is_terminal()).await;
        let Message::SendRppStatus(status) = h
            .rpp
            .handle(AskMonitor { session_id: id.to_string() }.into())
            .await
        else {
            panic!("expected status");
        };
        assert_eq!(status.rpp_status().unwrap().state, RppState::ResultsAvailable);

        let Message::SendResults(results) = h
            .rpp
            .handle(AskResults { session_id: id.to_string() }.into())
            .await
        else {
            panic!("expected results");
        };
        let text = open_results(&h.enc, &key, &results.encrypted_results).unwrap();
        assert!(text.contains("GENE1\t1\t2\t2\t1\t3"));
        assert!(text.contains("GENE2\t1\t1\t2\t1\t3"));
    }

    #[tokio::test]
    async fn empty_extraction_is_sticky() {
        let panel = "# nothing rare\n3-900-C-T\tGENE3\t0.4\tsynonymous_variant\t1,1,1\n";
        let h = harness_with(panel).await;
        let keys = ClientKeys::generate(&h.enc).unwrap();
        let Message::SendSession(session) = h.rpp.handle(ask_session(&keys, "FrEx")).await else {
            panic!("expected session");
        };
        let id = session.session().unwrap();
        let status = wait_for(&h.rpp, &id, |s| s == RppState::RppEmptyData).await;
        assert_eq!(status.state, RppState::RppEmptyData);

        let data = SendClientData {
            session_id: id.to_string(),
            encrypted_aes_key: "a".into(),
            encrypted_client_data: "b".into(),
            encrypted_excluded_variants: "c".into(),
            algorithm: "carrier-count".into(),
        };
        assert!(matches!(h.rpp.handle(data.into()).await, Message::SendError(_)));
        assert_eq!(h.rpp.monitor(&id).await.state, RppState::RppEmptyData);
    }

    #[tokio::test]
    async fn results_before_completion_are_refused() {
        let h = harness_with(FREX).await;
        let (id, _) = h.rpp.store().create().await.unwrap();
        let reply = h
            .rpp
            .handle(AskResults { session_id: id.to_string() }.into())
            .await;
        assert!(matches!(reply, Message::SendError(e) if e.error_message.contains("NEW_SESSION")));
        let missing = SessionId::generate();
        assert_eq!(h.rpp.monitor(&missing).await.state, RppState::NoSession);
    }

    async fn session_in_tps_phase(rpp: &Rpp) -> SessionId {
        let (id, _) = rpp.store().create().await.unwrap();
        rpp.store().transition(&id, RppEvent::ClientDataReceived).await.unwrap();
        rpp.store().transition(&id, RppEvent::ExtractionComplete).await.unwrap();
        id
    }

    async fn write_tps_status(rpp: &Rpp, id: &SessionId, contents: &str) {
        let job = rpp.store().job_dir(id);
        tokio::fs::create_dir_all(job.path()).await.unwrap();
        job.write_status(contents).await.unwrap();
    }

    #[tokio::test]
    async fn monitor_relays_tps_artifact() {
        let h = harness_with(FREX).await;
        let id = session_in_tps_phase(&h.rpp).await;
        assert_eq!(h.rpp.monitor(&id).await.state, RppState::TpsSending);

        write_tps_status(&h.rpp, &id, &TpStatus::new(TpsState::Pending, "2").to_string()).await;
        let status = h.rpp.monitor(&id).await;
        assert_eq!(status.state, RppState::TpsPending);
        assert_eq!(status.details.as_deref(), Some("2"));

        let running = TpStatus::new(TpsState::Running, "gene 4/9\tETA 1m");
        write_tps_status(&h.rpp, &id, &running.to_string()).await;
        let status = h.rpp.monitor(&id).await;
        assert_eq!(status.state, RppState::TpsRunning);
        assert_eq!(status.details.as_deref(), Some("gene 4/9\tETA 1m"));

        write_tps_status(&h.rpp, &id, "not a status line").await;
        assert_eq!(h.rpp.monitor(&id).await.state, RppState::TpsUnknown);

        let failed = TpStatus::new(TpsState::Error, "decrypt failed");
        write_tps_status(&h.rpp, &id, &failed.to_string()).await;
        let status = h.rpp.monitor(&id).await;
        assert_eq!(status.state, RppState::TpsError);
        assert!(status.state.is_failure());
    }

    #[tokio::test]
    async fn lost_artifact_is_unreachable_and_retried() {
        let h = harness_with(FREX).await;
        let id = session_in_tps_phase(&h.rpp).await;
        write_tps_status(&h.rpp, &id, &TpStatus::new(TpsState::Started, "").to_string()).await;
        assert_eq!(h.rpp.monitor(&id).await.state, RppState::TpsRunning);

        tokio::fs::remove_file(h.rpp.store().job_dir(&id).status_path()).await.unwrap();
        assert_eq!(h.rpp.monitor(&id).await.state, RppState::TpsUnreachable);

        write_tps_status(&h.rpp, &id, &TpStatus::new(TpsState::Running, "back").to_string()).await;
        assert_eq!(h.rpp.monitor(&id).await.state, RppState::TpsRunning);
    }

    #[tokio::test]
    async fn done_without_results_is_an_error() {
        let h = harness_with(FREX).await;
        let id = session_in_tps_phase(&h.rpp).await;
        write_tps_status(&h.rpp, &id, &TpStatus::new(TpsState::Done, "").to_string()).await;
        let status = h.rpp.monitor(&id).await;
        assert_eq!(status.state, RppState::Error);
        assert!(status.details.unwrap_or_default().contains("cannot stage results"));
    }

    #[tokio::test]
    async fn persisted_tps_done_is_staged_after_restart() {
        let h = harness_with(FREX).await;
        let id = session_in_tps_phase(&h.rpp).await;
        let job = h.rpp.store().job_dir(&id);
        tokio::fs::create_dir_all(job.path()).await.unwrap();
        job.write_results("sealed-results").await.unwrap();
        job.write_status(&TpStatus::new(TpsState::Done, "").to_string())
            .await
            .unwrap();
        // the RPP went down after recording TPS_DONE, before staging
        let done = RppEvent::TpsDone {
            details: String::new(),
        };
        h.rpp.store().transition(&id, done).await.unwrap();
        assert_eq!(h.rpp.store().status(&id).await.state, RppState::TpsDone);

        let restarted = Rpp::new(
            h.rpp.config().clone(),
            h.rpp.extractor.clone(),
            h.rpp.launcher.clone(),
            h.rpp.enc.clone(),
        );
        assert_eq!(restarted.monitor(&id).await.state, RppState::ResultsAvailable);
        let staged = restarted.store().read_file(&id, store::RESULTS).await.unwrap();
        assert_eq!(staged, "sealed-results");
    }

    #[tokio::test]
    async fn pushed_tps_status_is_relayed() {
        let h = harness_with(FREX).await;
        let id = session_in_tps_phase(&h.rpp).await;
        let push = SendTpsStatus::new(&id, &TpStatus::new(TpsState::Running, "pushed"));
        let Message::SendRppStatus(reply) = h.rpp.handle(push.into()).await else {
            panic!("expected status");
        };
        assert_eq!(reply.rpp_status().unwrap().state, RppState::TpsRunning);
        let artifact = h.rpp.store().job_dir(&id).read_status().await.unwrap();
        assert_eq!(TpStatus::parse(&artifact).details, "pushed");
    }

    #[tokio::test]
    async fn peers_cannot_send_replies() {
        let h = harness_with(FREX).await;
        let reply = h.rpp.handle(Message::error("hello")).await;
        assert!(matches!(reply, Message::SendError(e) if e.error_message.contains("SendError")));
    }
}
