//! One method per catalog exchange.

use crate::ClientError;
use privas_core::handoff::{ClientKeys, SealedSubmission};
use privas_core::status::RppStatus;
use privas_core::wire::{self, Framing};
use privas_core::{
    AskMonitor, AskResults, AskRppConfiguration, AskSession, Dataset, Encryptor, Message,
    MessageKind, PublicKey, Salt, SendClientData, SessionId,
};
use tokio::net::TcpStream;

/// Parameters of `AskSession`, minus the client key.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionParams {
    pub dataset: String,
    pub gnomad_version: String,
    pub max_af: f64,
    pub subpopulation: String,
    pub max_af_subpop: f64,
    pub min_csq: String,
    pub limit_to_snvs: bool,
    pub bed_file: Option<String>,
    pub qc_param: String,
}

impl SessionParams {
    pub fn new(dataset: impl Into<String>, max_af: f64) -> Self {
        Self {
            dataset: dataset.into(),
            gnomad_version: "2.1.1".to_string(),
            max_af,
            subpopulation: "ALL".to_string(),
            max_af_subpop: max_af,
            min_csq: "missense_variant".to_string(),
            limit_to_snvs: false,
            bed_file: None,
            qc_param: "default".to_string(),
        }
    }

    fn ask(&self, keys: &ClientKeys) -> AskSession {
        AskSession {
            client_public_key: keys.public_key().as_pem().to_string(),
            dataset: self.dataset.clone(),
            gnomad_version: self.gnomad_version.clone(),
            max_af: self.max_af.to_string(),
            subpopulation: self.subpopulation.clone(),
            max_af_subpop: self.max_af_subpop.to_string(),
            min_csq: self.min_csq.clone(),
            limit_to_snvs: self.limit_to_snvs.to_string(),
            bed_file: self.bed_file.clone().unwrap_or_default(),
            qc_param: self.qc_param.clone(),
        }
    }
}

/// What `SendRPPConfiguration` announces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RppConfiguration {
    pub datasets: Vec<Dataset>,
    pub tps_name: String,
}

/// A session the RPP granted, with the salt already unwrapped.
#[derive(Debug, Clone)]
pub struct SessionGrant {
    pub session: SessionId,
    pub salt: Salt,
    pub tps_key: PublicKey,
    pub bed_file: Option<String>,
}

fn unexpected(expected: MessageKind, got: &Message) -> ClientError {
    ClientError::Unexpected {
        expected,
        got: got.kind(),
    }
}

/// Talks to one RPP.
#[derive(Debug, Clone)]
pub struct RppClient {
    addr: String,
    framing: Framing,
}

impl RppClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            framing: Framing::default(),
        }
    }

    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn connect(&self) -> Result<TcpStream, ClientError> {
        TcpStream::connect(&self.addr)
            .await
            .map_err(|source| ClientError::Connect {
                addr: self.addr.clone(),
                source,
            })
    }

    /// Send one request on a fresh connection and read the reply.
    async fn exchange(&self, request: Message) -> Result<Message, ClientError> {
        let mut stream = self.connect().await?;
        tracing::debug!(kind = %request.kind(), rpp = %self.addr, "request");
        self.framing.write(&mut stream, &request).await?;
        refused(wire::read(&mut stream).await?)
    }

    pub async fn configuration(&self) -> Result<RppConfiguration, ClientError> {
        match self.exchange(AskRppConfiguration {}.into()).await? {
            Message::SendRppConfiguration(config) => Ok(RppConfiguration {
                datasets: config.dataset_list()?,
                tps_name: config.tps_name,
            }),
            other => Err(unexpected(MessageKind::SendRppConfiguration, &other)),
        }
    }

    /// Ask for a session and unwrap the salt the RPP returns.
    pub async fn open_session(
        &self,
        params: &SessionParams,
        keys: &ClientKeys,
        enc: &dyn Encryptor,
    ) -> Result<SessionGrant, ClientError> {
        match self.exchange(params.ask(keys).into()).await? {
            Message::SendSession(granted) => Ok(SessionGrant {
                session: granted.session()?,
                salt: keys.open_salt(enc, &granted.encrypted_hash_key)?,
                tps_key: PublicKey::from_pem(granted.third_party_public_key),
                bed_file: Some(granted.bed_file).filter(|b| !b.is_empty()),
            }),
            other => Err(unexpected(MessageKind::SendSession, &other)),
        }
    }

    pub async fn send_client_data(
        &self,
        session: &SessionId,
        sealed: SealedSubmission,
        algorithm: &str,
    ) -> Result<(), ClientError> {
        let request = SendClientData {
            session_id: session.to_string(),
            encrypted_aes_key: sealed.encrypted_aes_key,
            encrypted_client_data: sealed.encrypted_client_data,
            encrypted_excluded_variants: sealed.encrypted_excluded_variants,
            algorithm: algorithm.to_string(),
        };
        match self.exchange(request.into()).await? {
            Message::AckClientData(_) => Ok(()),
            other => Err(unexpected(MessageKind::AckClientData, &other)),
        }
    }

    /// Open a connection for repeated status polls.
    pub async fn monitor(&self) -> Result<Monitor, ClientError> {
        Ok(Monitor {
            stream: self.connect().await?,
            framing: self.framing,
        })
    }

    /// The sealed results; only valid once the session is RESULTS_AVAILABLE.
    pub async fn results(&self, session: &SessionId) -> Result<String, ClientError> {
        let request = AskResults {
            session_id: session.to_string(),
        };
        match self.exchange(request.into()).await? {
            Message::SendResults(results) => Ok(results.encrypted_results),
            other => Err(unexpected(MessageKind::SendResults, &other)),
        }
    }
}

fn refused(reply: Message) -> Result<Message, ClientError> {
    match reply {
        Message::SendError(e) => Err(ClientError::Refused(e.error_message)),
        reply => Ok(reply),
    }
}

/// A polling connection.
pub struct Monitor {
    stream: TcpStream,
    framing: Framing,
}

impl Monitor {
    pub async fn poll(&mut self, session: &SessionId) -> Result<RppStatus, ClientError> {
        let request = AskMonitor {
            session_id: session.to_string(),
        };
        self.framing.write(&mut self.stream, &request.into()).await?;
        match refused(wire::read(&mut self.stream).await?)? {
            Message::SendRppStatus(status) => Ok(status.rpp_status()?),
            other => Err(unexpected(MessageKind::SendRppStatus, &other)),
        }
    }
}
