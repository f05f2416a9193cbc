//! A whole analysis from the client's chair.

use crate::{ClientError, Monitor, RppClient, SessionParams};
use privas_core::handoff::{ClientKeys, open_results, seal_submission};
use privas_core::payload::{self, VariantRecord};
use privas_core::status::{RppState, RppStatus};
use privas_core::{Encryptor, SessionId};
use std::path::Path;
use std::time::Duration;

/// Consecutive broken polls tolerated before giving up. UNKNOWN replies
/// count the same way: the RPP cannot read the session's status.
const MAX_POLL_FAILURES: usize = 3;

/// Post-QC genotypes and the variants QC dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInput {
    pub records: Vec<VariantRecord>,
    pub excluded: Vec<String>,
}

impl ClientInput {
    /// Read `variant\tgene\tdosages` rows and an optional one-per-line
    /// excluded-variant list.
    pub async fn load(genotypes: &Path, excluded: Option<&Path>) -> Result<Self, ClientError> {
        let records = payload::decode_records(&tokio::fs::read_to_string(genotypes).await?)?;
        let excluded = match excluded {
            Some(path) => payload::decode_variant_list(&tokio::fs::read_to_string(path).await?),
            None => Vec::new(),
        };
        Ok(Self { records, excluded })
    }
}

/// A finished analysis.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub session: SessionId,
    /// Decrypted result text.
    pub results: String,
}

/// Run one analysis end to end.
///
/// `on_status` sees every status change while the session runs. A session
/// ending anywhere but RESULTS_AVAILABLE is a [`ClientError::Failed`], and so
/// is one the RPP keeps reporting as UNKNOWN. TPS_UNREACHABLE is transient
/// and polling goes on.
pub async fn run_analysis(
    client: &RppClient,
    enc: &dyn Encryptor,
    params: &SessionParams,
    input: &ClientInput,
    algorithm: &str,
    poll_interval: Duration,
    mut on_status: impl FnMut(&SessionId, &RppStatus) + Send,
) -> Result<Analysis, ClientError> {
    let keys = ClientKeys::generate(enc)?;
    let grant = client.open_session(params, &keys, enc).await?;
    let session = grant.session.clone();
    tracing::info!(%session, dataset = %params.dataset, "session opened");

    let (key, sealed) = seal_submission(
        enc,
        &grant.tps_key,
        &grant.salt,
        &input.records,
        &input.excluded,
    )?;
    client.send_client_data(&session, sealed, algorithm).await?;
    tracing::info!(%session, variants = input.records.len(), "client data sent");

    let mut monitor: Option<Monitor> = None;
    let mut failures = 0;
    let mut unknown = 0;
    let mut last: Option<(RppState, Option<String>)> = None;
    loop {
        let polled = match monitor.as_mut() {
            Some(m) => m.poll(&session).await,
            None => match client.monitor().await {
                Ok(m) => monitor.insert(m).poll(&session).await,
                Err(e) => Err(e),
            },
        };
        let status = match polled {
            Ok(status) => {
                failures = 0;
                status
            }
            Err(e) => {
                failures += 1;
                tracing::warn!(%session, error = %e, "status poll failed");
                if failures >= MAX_POLL_FAILURES {
                    return Err(e);
                }
                monitor = None;
                tokio::time::sleep(poll_interval).await;
                continue;
            }
        };
        let seen = Some((status.state, status.details.clone()));
        if last != seen {
            on_status(&session, &status);
            last = seen;
        }

        unknown = if status.state == RppState::Unknown {
            unknown + 1
        } else {
            0
        };
        match status.state {
            RppState::ResultsAvailable => break,
            state
                if state.is_terminal()
                    || state == RppState::NoSession
                    || unknown >= MAX_POLL_FAILURES =>
            {
                return Err(ClientError::Failed {
                    session,
                    state,
                    details: status.details.unwrap_or_default(),
                });
            }
            _ => tokio::time::sleep(poll_interval).await,
        }
    }

    let sealed_results = client.results(&session).await?;
    let results = open_results(enc, &key, &sealed_results)?;
    Ok(Analysis { session, results })
}
