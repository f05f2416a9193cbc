//! Protocol messages.
//!
//! Every exchange between the Client, the RPP and the TPS carries exactly one
//! [`Message`]. The set of kinds is closed: each kind is a struct with a fixed
//! list of string fields, and [`Message::build`] is the only way to turn a
//! loose field map (as read off the wire) back into one of them.

use crate::status::{RppStatus, TpStatus};
use crate::{Dataset, SessionId};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Names of the fields a message can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldKey {
    Datasets,
    TpsName,
    ClientPublicKey,
    Dataset,
    GnomadVersion,
    MaxAf,
    Subpopulation,
    MaxAfSubpop,
    MinCsq,
    LimitToSnvs,
    BedFile,
    QcParam,
    SessionId,
    EncryptedHashKey,
    ThirdPartyPublicKey,
    EncryptedAesKey,
    EncryptedClientData,
    EncryptedExcludedVariants,
    Algorithm,
    Status,
    EncryptedResults,
    ErrorMessage,
}

impl FieldKey {
    pub const ALL: &'static [FieldKey] = &[
        FieldKey::Datasets,
        FieldKey::TpsName,
        FieldKey::ClientPublicKey,
        FieldKey::Dataset,
        FieldKey::GnomadVersion,
        FieldKey::MaxAf,
        FieldKey::Subpopulation,
        FieldKey::MaxAfSubpop,
        FieldKey::MinCsq,
        FieldKey::LimitToSnvs,
        FieldKey::BedFile,
        FieldKey::QcParam,
        FieldKey::SessionId,
        FieldKey::EncryptedHashKey,
        FieldKey::ThirdPartyPublicKey,
        FieldKey::EncryptedAesKey,
        FieldKey::EncryptedClientData,
        FieldKey::EncryptedExcludedVariants,
        FieldKey::Algorithm,
        FieldKey::Status,
        FieldKey::EncryptedResults,
        FieldKey::ErrorMessage,
    ];

    /// The key as it appears on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            FieldKey::Datasets => "datasets",
            FieldKey::TpsName => "tpsName",
            FieldKey::ClientPublicKey => "clientPublicKey",
            FieldKey::Dataset => "dataset",
            FieldKey::GnomadVersion => "gnomADVersion",
            FieldKey::MaxAf => "maxAF",
            FieldKey::Subpopulation => "subpopulation",
            FieldKey::MaxAfSubpop => "maxAFSubpop",
            FieldKey::MinCsq => "minCSQ",
            FieldKey::LimitToSnvs => "limitToSNVs",
            FieldKey::BedFile => "bedFile",
            FieldKey::QcParam => "qcParam",
            FieldKey::SessionId => "sessionId",
            FieldKey::EncryptedHashKey => "encryptedHashKey",
            FieldKey::ThirdPartyPublicKey => "thirdPartyPublicKey",
            FieldKey::EncryptedAesKey => "encryptedAESKey",
            FieldKey::EncryptedClientData => "encryptedClientData",
            FieldKey::EncryptedExcludedVariants => "encryptedExcludedVariants",
            FieldKey::Algorithm => "algorithm",
            FieldKey::Status => "status",
            FieldKey::EncryptedResults => "encryptedResults",
            FieldKey::ErrorMessage => "errorMessage",
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldKey::ALL
            .iter()
            .copied()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// Whether a kind requires a field to be non-empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub key: FieldKey,
    pub required: bool,
}

/// Error building or reading a message.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MessageError {
    #[error("unknown message kind: {0}")]
    UnknownKind(String),
    #[error("{kind} does not carry field {field}")]
    UnknownField { kind: &'static str, field: String },
    #[error("field {0} appears more than once")]
    DuplicateField(String),
    #[error("{kind} is missing required field {field}")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },
    #[error("field {field} is not a valid {expected}: {value:?}")]
    Format {
        field: &'static str,
        expected: &'static str,
        value: String,
    },
}

fn take_field(
    kind: MessageKind,
    fields: &mut BTreeMap<FieldKey, String>,
    key: FieldKey,
    required: bool,
) -> Result<String, MessageError> {
    match fields.remove(&key) {
        Some(value) if !value.is_empty() || !required => Ok(value),
        None if !required => Ok(String::new()),
        _ => Err(MessageError::MissingField {
            kind: kind.name(),
            field: key.as_str(),
        }),
    }
}

macro_rules! catalog {
    (@required) => { true };
    (@required optional) => { false };
    ($(
        $(#[$meta:meta])*
        $kind:ident = $name:literal {
            $( $field:ident: $key:ident $([$opt:ident])?, )*
        }
    )*) => {
        /// Discriminant of a [`Message`].
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum MessageKind {
            $( $kind, )*
        }

        impl MessageKind {
            pub const ALL: &'static [MessageKind] = &[$( MessageKind::$kind, )*];

            /// The kind name as it appears on the wire.
            pub fn name(self) -> &'static str {
                match self {
                    $( MessageKind::$kind => $name, )*
                }
            }

            /// The fields this kind carries, in wire order.
            pub fn fields(self) -> &'static [FieldSpec] {
                match self {
                    $( MessageKind::$kind => &[
                        $( FieldSpec { key: FieldKey::$key, required: catalog!(@required $($opt)?) }, )*
                    ], )*
                }
            }
        }

        $(
            $(#[$meta])*
            #[derive(Debug, Clone, PartialEq, Eq, Default)]
            pub struct $kind {
                $( pub $field: String, )*
            }

            impl $kind {
                #[allow(unused_variables)]
                fn take(fields: &mut BTreeMap<FieldKey, String>) -> Result<Self, MessageError> {
                    Ok(Self {
                        $( $field: take_field(
                            MessageKind::$kind,
                            fields,
                            FieldKey::$key,
                            catalog!(@required $($opt)?),
                        )?, )*
                    })
                }

                fn fields(&self) -> Vec<(FieldKey, &str)> {
                    vec![$( (FieldKey::$key, self.$field.as_str()), )*]
                }
            }

            impl From<$kind> for Message {
                fn from(message: $kind) -> Self {
                    Message::$kind(message)
                }
            }
        )*

        /// A protocol message.
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub enum Message {
            $( $kind($kind), )*
        }

        impl Message {
            pub fn kind(&self) -> MessageKind {
                match self {
                    $( Message::$kind(_) => MessageKind::$kind, )*
                }
            }

            /// Build a message of `kind` from a field map.
            ///
            /// Fails if a required field is absent or empty, or if the map
            /// holds a key this kind does not carry.
            pub fn build(
                kind: MessageKind,
                mut fields: BTreeMap<FieldKey, String>,
            ) -> Result<Self, MessageError> {
                let message = match kind {
                    $( MessageKind::$kind => Message::$kind($kind::take(&mut fields)?), )*
                };
                if let Some(key) = fields.keys().next() {
                    return Err(MessageError::UnknownField {
                        kind: kind.name(),
                        field: key.as_str().to_string(),
                    });
                }
                Ok(message)
            }

            /// The `(key, value)` pairs of this message, in catalog order.
            pub fn fields(&self) -> Vec<(FieldKey, &str)> {
                match self {
                    $( Message::$kind(m) => m.fields(), )*
                }
            }
        }
    };
}

catalog! {
    /// Client asks the RPP which datasets it serves.
    AskRppConfiguration = "AskRPPConfiguration" {}

    /// RPP describes its datasets and the TPS it delegates to.
    SendRppConfiguration = "SendRPPConfiguration" {
        datasets: Datasets,
        tps_name: TpsName,
    }

    /// Client opens a session.
    AskSession = "AskSession" {
        client_public_key: ClientPublicKey,
        dataset: Dataset,
        gnomad_version: GnomadVersion,
        max_af: MaxAf,
        subpopulation: Subpopulation,
        max_af_subpop: MaxAfSubpop,
        min_csq: MinCsq,
        limit_to_snvs: LimitToSnvs,
        bed_file: BedFile [optional],
        qc_param: QcParam,
    }

    /// RPP confirms a session and hands over the wrapped salt and the TPS key.
    SendSession = "SendSession" {
        session_id: SessionId,
        encrypted_hash_key: EncryptedHashKey,
        third_party_public_key: ThirdPartyPublicKey,
        bed_file: BedFile [optional],
    }

    /// Client submits its sealed genotypes.
    SendClientData = "SendClientData" {
        session_id: SessionId,
        encrypted_aes_key: EncryptedAesKey,
        encrypted_client_data: EncryptedClientData,
        encrypted_excluded_variants: EncryptedExcludedVariants,
        algorithm: Algorithm,
    }

    /// RPP acknowledges the client submission.
    AckClientData = "AckClientData" {
        session_id: SessionId,
    }

    /// Client polls the session status.
    AskMonitor = "AskMonitor" {
        session_id: SessionId,
    }

    /// RPP reports the session status.
    SendRppStatus = "SendRPPStatus" {
        session_id: SessionId,
        status: Status,
    }

    /// TPS job status relayed to the RPP.
    SendTpsStatus = "SendTPSStatus" {
        session_id: SessionId,
        status: Status,
    }

    /// Client asks for the sealed results.
    AskResults = "AskResults" {
        session_id: SessionId,
    }

    /// RPP relays the sealed results.
    SendResults = "SendResults" {
        session_id: SessionId,
        encrypted_results: EncryptedResults,
    }

    /// Failure reply to any exchange.
    SendError = "SendError" {
        error_message: ErrorMessage,
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MessageKind {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "SendStatus" {
            return Ok(MessageKind::SendRppStatus);
        }
        MessageKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| MessageError::UnknownKind(s.to_string()))
    }
}

impl Message {
    /// Build a message from raw wire strings.
    pub fn from_raw(kind: &str, raw: Vec<(String, String)>) -> Result<Self, MessageError> {
        let kind: MessageKind = kind.parse()?;
        let mut fields = BTreeMap::new();
        for (key, value) in raw {
            let key: FieldKey = key.parse().map_err(|field| MessageError::UnknownField {
                kind: kind.name(),
                field,
            })?;
            if fields.insert(key, value).is_some() {
                return Err(MessageError::DuplicateField(key.as_str().to_string()));
            }
        }
        Message::build(kind, fields)
    }

    /// Check that every required field is non-empty.
    ///
    /// Messages built with struct literals skip [`Message::build`]; the wire
    /// writer calls this before anything reaches the stream.
    pub fn validate(&self) -> Result<(), MessageError> {
        let kind = self.kind();
        for (def, (_, value)) in kind.fields().iter().zip(self.fields()) {
            if def.required && value.is_empty() {
                return Err(MessageError::MissingField {
                    kind: kind.name(),
                    field: def.key.as_str(),
                });
            }
        }
        Ok(())
    }

    /// The session this message refers to, if its kind carries one.
    pub fn session_id(&self) -> Option<&str> {
        self.fields()
            .into_iter()
            .find(|(key, _)| *key == FieldKey::SessionId)
            .map(|(_, value)| value)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Message::SendError(SendError {
            error_message: message.into(),
        })
    }
}

fn parse_f64(field: FieldKey, value: &str) -> Result<f64, MessageError> {
    value.trim().parse().map_err(|_| MessageError::Format {
        field: field.as_str(),
        expected: "number",
        value: value.to_string(),
    })
}

fn parse_session(value: &str) -> Result<SessionId, MessageError> {
    value.parse().map_err(|_| MessageError::Format {
        field: FieldKey::SessionId.as_str(),
        expected: "session id",
        value: value.to_string(),
    })
}

impl SendRppConfiguration {
    pub fn new(datasets: &[Dataset], tps_name: impl Into<String>) -> Result<Self, MessageError> {
        let datasets = serde_json::to_string(datasets).map_err(|e| MessageError::Format {
            field: FieldKey::Datasets.as_str(),
            expected: "dataset list",
            value: e.to_string(),
        })?;
        Ok(Self {
            datasets,
            tps_name: tps_name.into(),
        })
    }

    pub fn dataset_list(&self) -> Result<Vec<Dataset>, MessageError> {
        serde_json::from_str(&self.datasets).map_err(|_| MessageError::Format {
            field: FieldKey::Datasets.as_str(),
            expected: "dataset list",
            value: self.datasets.clone(),
        })
    }
}

impl AskSession {
    pub fn max_af_value(&self) -> Result<f64, MessageError> {
        parse_f64(FieldKey::MaxAf, &self.max_af)
    }

    pub fn max_af_subpop_value(&self) -> Result<f64, MessageError> {
        parse_f64(FieldKey::MaxAfSubpop, &self.max_af_subpop)
    }

    pub fn limit_to_snvs_value(&self) -> Result<bool, MessageError> {
        self.limit_to_snvs
            .trim()
            .to_ascii_lowercase()
            .parse()
            .map_err(|_| MessageError::Format {
                field: FieldKey::LimitToSnvs.as_str(),
                expected: "boolean",
                value: self.limit_to_snvs.clone(),
            })
    }
}

macro_rules! session_accessor {
    ($($kind:ident),*) => {
        $(
            impl $kind {
                pub fn session(&self) -> Result<SessionId, MessageError> {
                    parse_session(&self.session_id)
                }
            }
        )*
    };
}

session_accessor!(
    SendSession,
    SendClientData,
    AckClientData,
    AskMonitor,
    SendRppStatus,
    SendTpsStatus,
    AskResults,
    SendResults
);

impl SendRppStatus {
    pub fn new(session: &SessionId, status: &RppStatus) -> Self {
        Self {
            session_id: session.to_string(),
            status: status.to_string(),
        }
    }

    pub fn rpp_status(&self) -> Result<RppStatus, MessageError> {
        self.status.parse().map_err(|_| MessageError::Format {
            field: FieldKey::Status.as_str(),
            expected: "RPP status",
            value: self.status.clone(),
        })
    }
}

impl SendTpsStatus {
    pub fn new(session: &SessionId, status: &TpStatus) -> Self {
        Self {
            session_id: session.to_string(),
            status: status.to_string(),
        }
    }

    /// TPS status lines never fail to parse; garbage becomes UNKNOWN.
    pub fn tp_status(&self) -> TpStatus {
        TpStatus::parse(&self.status)
    }
}
