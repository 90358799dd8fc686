use std::sync::Arc;

use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::upstream::{UpstreamClient, Vehicle};
use crate::utils::normalize_vin;

/// Find the account holding `vin` and return its vehicle handle.
///
/// `vin` must already be normalized. With a single account the vehicle list
/// is not fetched: the handle is returned directly and an unknown VIN only
/// fails on the first vehicle call.
pub async fn resolve_vehicle(client: &dyn UpstreamClient, vin: &str) -> Result<Arc<dyn Vehicle>> {
    let accounts = client.accounts().await.map_err(|e| {
        error!("Failed to retrieve API accounts: {}", e);
        e
    })?;

    info!("Found {} Renault accounts", accounts.len());

    if let [account] = accounts.as_slice() {
        info!(
            "Single account detected ({}), returning vehicle without listing",
            account.id()
        );
        return account.vehicle(vin).await;
    }

    let mut seen = Vec::new();

    for account in &accounts {
        let links = match account.vehicles().await {
            Ok(links) => links,
            Err(e) => {
                warn!("Error checking account {}: {}", account.id(), e);
                continue;
            }
        };

        for link in links {
            let listed = link.vin.as_deref().map(normalize_vin).unwrap_or_default();
            let matched = listed == vin;
            seen.push(listed);

            if matched {
                info!("Vehicle found in account {}", account.id());
                return account.vehicle(vin).await;
            }
        }
    }

    error!("Vehicle with VIN {} not found. Available VINs: {:?}", vin, seen);
    Err(Error::VehicleNotFound {
        vin: vin.to_string(),
        seen,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeAccount, FakeUpstream};

    #[tokio::test]
    async fn test_single_account_skips_listing() {
        let account = FakeAccount::new("acc-1", &["VF111"]);
        let upstream = FakeUpstream::new(vec![account.clone()]);

        let vehicle = resolve_vehicle(&upstream, "VF999").await.unwrap();
        assert_eq!(vehicle.vin(), "VF999");
        assert_eq!(account.list_calls(), 0);
    }

    #[tokio::test]
    async fn test_second_account_holds_vin() {
        let first = FakeAccount::new("acc-1", &["VF123456789"]);
        let second = FakeAccount::new("acc-2", &[" vf000111222 "]);
        let upstream = FakeUpstream::new(vec![first.clone(), second.clone()]);

        let vehicle = resolve_vehicle(&upstream, "VF000111222").await.unwrap();
        assert_eq!(vehicle.vin(), "VF000111222");
        assert_eq!(second.handle_calls(), 1);
        assert_eq!(first.handle_calls(), 0);
    }

    #[tokio::test]
    async fn test_failing_account_is_skipped() {
        let broken = FakeAccount::failing("acc-1");
        let good = FakeAccount::new("acc-2", &["VF42"]);
        let upstream = FakeUpstream::new(vec![broken.clone(), good]);

        let vehicle = resolve_vehicle(&upstream, "VF42").await.unwrap();
        assert_eq!(vehicle.vin(), "VF42");
        assert_eq!(broken.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_unknown_vin_checks_every_account() {
        let a = FakeAccount::new("acc-1", &["VF1"]);
        let b = FakeAccount::new("acc-2", &["VF2", "VF3"]);
        let upstream = FakeUpstream::new(vec![a.clone(), b.clone()]);

        let err = resolve_vehicle(&upstream, "VF9").await.err().unwrap();
        match err {
            Error::VehicleNotFound { vin, seen } => {
                assert_eq!(vin, "VF9");
                assert_eq!(seen, vec!["VF1", "VF2", "VF3"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(a.list_calls(), 1);
        assert_eq!(b.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_first_match_wins() {
        let a = FakeAccount::new("acc-1", &["VF7"]);
        let b = FakeAccount::new("acc-2", &["VF7"]);
        let upstream = FakeUpstream::new(vec![a.clone(), b.clone()]);

        resolve_vehicle(&upstream, "VF7").await.unwrap();
        assert_eq!(a.handle_calls(), 1);
        assert_eq!(b.list_calls(), 0);
    }

    #[tokio::test]
    async fn test_account_fetch_failure_propagates() {
        let upstream = FakeUpstream::new(vec![]);
        upstream.fail_accounts();

        let err = resolve_vehicle(&upstream, "VF1").await.err().unwrap();
        assert!(matches!(err, Error::Upstream { status: 500, .. }));
    }
}
