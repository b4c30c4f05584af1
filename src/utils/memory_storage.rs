//! In-memory storage and ledger implementations for testing

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use crate::ledger::LedgerReadError;
use crate::traits::*;
use crate::types::*;
use crate::utils::normalize::{contains_key, keys_match, normalize_key};

#[derive(Debug, Default, Clone, PartialEq)]
struct State {
    users: HashMap<String, User>,
    profiles: HashMap<String, Profile>,
    used: HashMap<String, UsedReceipt>,
    clearances: Vec<Clearance>,
}

/// Point-in-time copy of everything a [`MemoryStorage`] holds
#[derive(Debug, Clone, PartialEq)]
pub struct StorageSnapshot(State);

/// In-memory storage implementation for testing and development
///
/// Every write takes the single state lock, so a settlement is applied
/// all-or-nothing.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Arc<RwLock<State>>,
    usage_reads: Arc<AtomicUsize>,
    fail_commits: Arc<AtomicBool>,
}

impl MemoryStorage {
    /// Create a new memory storage instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of usage-store reads served so far
    pub fn usage_reads(&self) -> usize {
        self.usage_reads.load(Ordering::SeqCst)
    }

    /// Make every following settlement commit fail
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Copy of the whole state, for before/after comparisons
    pub fn snapshot(&self) -> ClearanceResult<StorageSnapshot> {
        Ok(StorageSnapshot(self.read()?.clone()))
    }

    /// Seed a used receipt directly
    pub fn insert_used_receipt(&self, receipt: UsedReceipt) -> ClearanceResult<()> {
        let mut state = self.write()?;
        let key = normalize_key(&receipt.receipt_id);
        if state.used.contains_key(&key) {
            return Err(ClearanceError::Conflict(format!(
                "Receipt '{}' is already recorded as used",
                receipt.receipt_id
            )));
        }
        state.used.insert(key, receipt);
        Ok(())
    }

    fn read(&self) -> ClearanceResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| ClearanceError::Storage("memory storage lock poisoned".to_string()))
    }

    fn write(&self) -> ClearanceResult<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| ClearanceError::Storage("memory storage lock poisoned".to_string()))
    }
}

#[async_trait]
impl ProfileStore for MemoryStorage {
    async fn get_profile(&self, username: &str) -> ClearanceResult<Option<Profile>> {
        Ok(self.read()?.profiles.get(&normalize_key(username)).cloned())
    }

    async fn list_profiles(&self, search: Option<&str>) -> ClearanceResult<Vec<Profile>> {
        let state = self.read()?;
        let mut profiles: Vec<Profile> = state
            .profiles
            .values()
            .filter(|p| {
                search.is_none_or(|term| {
                    contains_key(&p.email, term) || contains_key(&p.username, term)
                })
            })
            .cloned()
            .collect();
        profiles.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(profiles)
    }

    async fn update_fees(&self, username: &str, fees: &FeeSchedule) -> ClearanceResult<Profile> {
        let mut state = self.write()?;
        let profile = state
            .profiles
            .get_mut(&normalize_key(username))
            .ok_or_else(|| ClearanceError::ProfileNotFound(username.to_string()))?;
        profile.school_fee_due = fees.school_fee_due.clone();
        profile.penalty_fee = fees.penalty_fee.clone();
        profile.excess_fee = fees.excess_fee.clone();
        profile.revision += 1;
        Ok(profile.clone())
    }
}

#[async_trait]
impl UsageStore for MemoryStorage {
    async fn used_receipts_for_user(&self, username: &str) -> ClearanceResult<Vec<UsedReceipt>> {
        self.usage_reads.fetch_add(1, Ordering::SeqCst);
        let state = self.read()?;
        Ok(state
            .used
            .values()
            .filter(|r| keys_match(&r.receipt_user, username))
            .cloned()
            .collect())
    }

    async fn find_used_receipts(&self, receipt_ids: &[String]) -> ClearanceResult<Vec<UsedReceipt>> {
        self.usage_reads.fetch_add(1, Ordering::SeqCst);
        let state = self.read()?;
        let mut found: Vec<UsedReceipt> = Vec::new();
        for id in receipt_ids {
            if let Some(receipt) = state.used.get(&normalize_key(id)) {
                if !found.iter().any(|r| keys_match(&r.receipt_id, &receipt.receipt_id)) {
                    found.push(receipt.clone());
                }
            }
        }
        Ok(found)
    }

    async fn list_used_receipts(&self, search: Option<&str>) -> ClearanceResult<Vec<UsedReceipt>> {
        let state = self.read()?;
        let mut receipts: Vec<UsedReceipt> = state
            .used
            .values()
            .filter(|r| {
                search.is_none_or(|term| {
                    contains_key(&r.receipt_user, term) || contains_key(&r.receipt_id, term)
                })
            })
            .cloned()
            .collect();
        receipts.sort_by(|a, b| a.used_at.cmp(&b.used_at).then(a.receipt_id.cmp(&b.receipt_id)));
        Ok(receipts)
    }
}

#[async_trait]
impl ClearanceStorage for MemoryStorage {
    async fn register_user(&self, user: &User, profile: &Profile) -> ClearanceResult<()> {
        let mut state = self.write()?;
        let key = normalize_key(&user.username);

        if state.users.contains_key(&key) {
            return Err(ClearanceError::Conflict(format!(
                "Username '{}' is already registered",
                user.username
            )));
        }
        if state.users.values().any(|u| keys_match(&u.email, &user.email)) {
            return Err(ClearanceError::Conflict(format!(
                "Account with the email '{}' already exists",
                user.email
            )));
        }
        if let Some(matricule) = &user.matricule {
            if state
                .users
                .values()
                .any(|u| u.matricule.as_deref().is_some_and(|m| keys_match(m, matricule)))
            {
                return Err(ClearanceError::Conflict(format!(
                    "Matricule '{}' is already registered",
                    matricule
                )));
            }
        }

        state.users.insert(key.clone(), user.clone());
        state.profiles.insert(key, profile.clone());
        Ok(())
    }

    async fn get_user(&self, username: &str) -> ClearanceResult<Option<User>> {
        Ok(self.read()?.users.get(&normalize_key(username)).cloned())
    }

    async fn list_users(&self, search: Option<&str>) -> ClearanceResult<Vec<User>> {
        let state = self.read()?;
        let mut users: Vec<User> = state
            .users
            .values()
            .filter(|u| {
                search.is_none_or(|term| {
                    contains_key(&u.email, term)
                        || contains_key(&u.username, term)
                        || u.matricule.as_deref().is_some_and(|m| contains_key(m, term))
                })
            })
            .cloned()
            .collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    async fn update_identity(&self, change: &IdentityChange) -> ClearanceResult<()> {
        let mut state = self.write()?;
        let old_key = normalize_key(&change.old_username);
        let new_key = normalize_key(&change.new_username);

        let matches_both = state
            .users
            .get(&old_key)
            .is_some_and(|u| keys_match(&u.email, &change.old_email));
        if !matches_both {
            return Err(ClearanceError::UserNotFound(format!(
                "no user with email '{}' and username '{}'",
                change.old_email, change.old_username
            )));
        }

        let collides = state.users.iter().any(|(key, u)| {
            *key != old_key && (*key == new_key || keys_match(&u.email, &change.new_email))
        });
        if collides {
            return Err(ClearanceError::Conflict(format!(
                "email '{}' or username '{}' belongs to another user",
                change.new_email, change.new_username
            )));
        }

        if let Some(mut user) = state.users.remove(&old_key) {
            user.email = change.new_email.clone();
            user.username = change.new_username.clone();
            state.users.insert(new_key.clone(), user);
        }
        if let Some(mut profile) = state.profiles.remove(&old_key) {
            profile.email = change.new_email.clone();
            profile.username = change.new_username.clone();
            profile.revision += 1;
            state.profiles.insert(new_key, profile);
        }
        Ok(())
    }

    async fn commit_settlement(&self, settlement: &Settlement) -> ClearanceResult<Clearance> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(ClearanceError::CommitFailed(
                "storage rejected the transaction".to_string(),
            ));
        }

        let mut state = self.write()?;
        let key = normalize_key(&settlement.username);

        // All checks run before the first mutation.
        let profile = state.profiles.get(&key).ok_or_else(|| {
            ClearanceError::CommitFailed(format!("profile '{}' disappeared", settlement.username))
        })?;
        if profile.revision != settlement.expected_revision {
            return Err(ClearanceError::CommitFailed(format!(
                "profile '{}' changed since it was read (revision {} != {})",
                settlement.username, profile.revision, settlement.expected_revision
            )));
        }
        let email = profile.email.clone();

        let mut seen = Vec::with_capacity(settlement.receipt_ids.len());
        for id in &settlement.receipt_ids {
            let id_key = normalize_key(id);
            if state.used.contains_key(&id_key) || seen.contains(&id_key) {
                return Err(ClearanceError::CommitFailed(format!(
                    "duplicate receipt id '{}'",
                    id
                )));
            }
            seen.push(id_key);
        }

        let now = chrono::Utc::now().naive_utc();
        let clearance = Clearance {
            clearance_id: state.clearances.len() as i64 + 1,
            receipt_user: email.clone(),
            receipt_id: settlement.reference.clone(),
            created_at: now,
        };
        state.clearances.push(clearance.clone());

        if let Some(profile) = state.profiles.get_mut(&key) {
            profile.used_receipt.push(ClearanceEntry {
                clearance_id: clearance.clearance_id,
                email,
                receipt_ids: settlement.receipt_ids.clone(),
            });
            profile.penalty_fee = bigdecimal::BigDecimal::from(0);
            profile.excess_fee = settlement.excess_fee.clone();
            profile.revision += 1;
        }

        for (id, id_key) in settlement.receipt_ids.iter().zip(seen) {
            state.used.insert(
                id_key,
                UsedReceipt {
                    receipt_id: id.clone(),
                    receipt_user: settlement.username.clone(),
                    used_at: now,
                },
            );
        }

        Ok(clearance)
    }

    async fn list_clearances(&self, search: Option<&str>) -> ClearanceResult<Vec<Clearance>> {
        let state = self.read()?;
        Ok(state
            .clearances
            .iter()
            .filter(|c| {
                search.is_none_or(|term| {
                    contains_key(&c.receipt_user, term) || contains_key(&c.receipt_id, term)
                })
            })
            .cloned()
            .collect())
    }
}

/// In-memory payment ledger for testing and development
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    rows: Arc<RwLock<Vec<Vec<String>>>>,
    reads: Arc<AtomicUsize>,
    failure: Arc<RwLock<Option<String>>>,
    delay: Option<Duration>,
}

impl MemoryLedger {
    /// Empty ledger without a header row
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger starting with the usual `Payment_ID, Amount, Name` header
    pub fn with_header() -> Self {
        let ledger = Self::new();
        ledger.push_raw(vec![
            "Payment_ID".to_string(),
            "Amount".to_string(),
            "Name".to_string(),
        ]);
        ledger
    }

    /// Delay every read, to exercise timeouts
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Append a `receipt id, amount, claimant` row
    pub fn push_row(&self, receipt_id: &str, amount: &str, claimant: &str) {
        self.push_raw(vec![
            receipt_id.to_string(),
            amount.to_string(),
            claimant.to_string(),
        ]);
    }

    /// Append an arbitrary row
    pub fn push_raw(&self, row: Vec<String>) {
        if let Ok(mut rows) = self.rows.write() {
            rows.push(row);
        }
    }

    /// Make reads fail with the given message, or succeed again with `None`
    pub fn set_failure(&self, message: Option<&str>) {
        if let Ok(mut failure) = self.failure.write() {
            *failure = message.map(str::to_string);
        }
    }

    /// Number of reads served so far
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerReader for MemoryLedger {
    async fn read_range(
        &self,
        _source_id: &str,
        _range: &str,
    ) -> Result<Vec<Vec<String>>, LedgerReadError> {
        self.reads.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self
            .failure
            .read()
            .map_err(|_| LedgerReadError::Source("memory ledger lock poisoned".to_string()))?
            .clone();
        if let Some(message) = failure {
            return Err(LedgerReadError::Source(message));
        }

        self.rows
            .read()
            .map(|rows| rows.clone())
            .map_err(|_| LedgerReadError::Source("memory ledger lock poisoned".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;

    async fn seeded() -> MemoryStorage {
        let storage = MemoryStorage::new();
        let user = NewUser::new("alice@uni.edu", "alice", "hash").into_user("hash".to_string());
        let profile = Profile::new(
            user.email.clone(),
            user.username.clone(),
            BigDecimal::from(DEFAULT_SCHOOL_FEE),
        );
        storage.register_user(&user, &profile).await.unwrap();
        storage
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates() {
        let storage = seeded().await;
        let user = NewUser::new("ALICE@uni.edu", "alice2", "hash").into_user("hash".to_string());
        let profile = Profile::new(user.email.clone(), user.username.clone(), BigDecimal::from(1));

        let result = storage.register_user(&user, &profile).await;
        assert!(matches!(result, Err(ClearanceError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_commit_checks_revision_before_writing() {
        let storage = seeded().await;
        let profile = storage.get_profile("alice").await.unwrap().unwrap();
        let settlement = Settlement::for_receipts(&profile, vec!["R1".to_string()], BigDecimal::from(0));

        storage
            .update_fees("alice", &profile.fees())
            .await
            .unwrap();
        let before = storage.snapshot().unwrap();

        let result = storage.commit_settlement(&settlement).await;
        assert!(matches!(result, Err(ClearanceError::CommitFailed(_))));
        assert_eq!(storage.snapshot().unwrap(), before);
    }

    #[tokio::test]
    async fn test_commit_rejects_used_receipt() {
        let storage = seeded().await;
        storage
            .insert_used_receipt(UsedReceipt {
                receipt_id: "R1".to_string(),
                receipt_user: "bob".to_string(),
                used_at: chrono::Utc::now().naive_utc(),
            })
            .unwrap();
        let profile = storage.get_profile("alice").await.unwrap().unwrap();
        let settlement = Settlement::for_receipts(
            &profile,
            vec!["R2".to_string(), "r1".to_string()],
            BigDecimal::from(0),
        );
        let before = storage.snapshot().unwrap();

        let result = storage.commit_settlement(&settlement).await;
        assert!(matches!(result, Err(ClearanceError::CommitFailed(_))));
        assert_eq!(storage.snapshot().unwrap(), before);
    }

    #[tokio::test]
    async fn test_commit_applies_every_step() {
        let storage = seeded().await;
        let profile = storage.get_profile("Alice").await.unwrap().unwrap();
        let settlement = Settlement::for_receipts(
            &profile,
            vec!["R1".to_string(), "R2".to_string()],
            BigDecimal::from(35000),
        );

        let clearance = storage.commit_settlement(&settlement).await.unwrap();
        assert_eq!(clearance.receipt_id, "R1,R2");
        assert_eq!(clearance.receipt_user, "alice@uni.edu");

        let profile = storage.get_profile("alice").await.unwrap().unwrap();
        assert_eq!(profile.excess_fee, BigDecimal::from(35000));
        assert_eq!(profile.penalty_fee, BigDecimal::from(0));
        assert_eq!(profile.used_receipt.len(), 1);
        assert_eq!(profile.used_receipt[0].clearance_id, clearance.clearance_id);
        assert_eq!(profile.revision, 1);

        let used = storage.used_receipts_for_user("ALICE").await.unwrap();
        assert_eq!(used.len(), 2);
    }

    #[tokio::test]
    async fn test_memory_ledger_failure_and_reads() {
        let ledger = MemoryLedger::with_header();
        ledger.push_row("R1", "100", "alice");
        assert_eq!(ledger.read_range("s", "A:C").await.unwrap().len(), 2);

        ledger.set_failure(Some("quota exceeded"));
        assert!(ledger.read_range("s", "A:C").await.is_err());
        assert_eq!(ledger.reads(), 2);
    }
}
