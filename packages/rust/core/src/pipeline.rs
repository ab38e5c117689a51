//! One repair pass: lease → extract → check → repair → release.

use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use roadmend_checker::{CheckStatus, LinkChecker};
use roadmend_shared::{LinkOccurrence, Result, RoadmendError};
use roadmend_storage::Storage;

use crate::extractor::extract_links;
use crate::lock::RunLease;
use crate::patcher::{PatchOutcome, apply_replacement};
use crate::replacement::ReplacementFinder;

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Unique URLs checked.
    pub checked: usize,
    pub valid: usize,
    pub invalid: usize,
    /// Unique URLs not probed because they point at a private address.
    pub blocked: usize,
    pub replaced: usize,
    /// Attempts that produced no usable URL.
    pub ai_failed: usize,
    /// Patches abandoned because the document drifted.
    pub skipped_drift: usize,
    /// Invalid occurrences that already had an unresolved record.
    pub already_logged: usize,
    /// Records resolved because their link answers again.
    pub now_valid: u64,
    pub documents_skipped: usize,
    /// Per-occurrence store failures.
    pub errors: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Another run holds the lease; nothing was touched.
    Busy,
    Completed(RunSummary),
}

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after each unique URL is checked.
    fn link_checked(&self, url: &str, current: usize, total: usize);
    /// Called when the run completes.
    fn done(&self, summary: &RunSummary);
    /// Called instead of `done` when the run stops on an error, with the
    /// counters reached so far.
    fn aborted(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn link_checked(&self, _url: &str, _current: usize, _total: usize) {}
    fn done(&self, _summary: &RunSummary) {}
    fn aborted(&self, _summary: &RunSummary) {}
}

/// The link integrity and repair pipeline.
pub struct Pipeline<'a> {
    storage: &'a Storage,
    checker: &'a LinkChecker,
    finder: &'a ReplacementFinder,
}

impl<'a> Pipeline<'a> {
    pub fn new(storage: &'a Storage, checker: &'a LinkChecker, finder: &'a ReplacementFinder) -> Self {
        Self {
            storage,
            checker,
            finder,
        }
    }

    /// Run one pass under `lease`.
    ///
    /// Returns [`RunOutcome::Busy`] without touching anything when the lease
    /// is held elsewhere. The lease is released on every path once taken;
    /// a failed release is only logged. The summary line is logged even when
    /// the pass aborts, with whatever was counted up to that point.
    #[instrument(skip_all, fields(lease = %lease.name()))]
    pub async fn run(
        &self,
        lease: &dyn RunLease,
        progress: &dyn ProgressReporter,
    ) -> Result<RunOutcome> {
        let Some(token) = lease.try_acquire().await? else {
            info!("another repair run holds the lease, skipping");
            return Ok(RunOutcome::Busy);
        };
        info!("lease acquired, starting link validation");

        let start = Instant::now();
        let mut summary = RunSummary::default();
        let result = self.run_locked(progress, &mut summary).await;
        log_summary(&summary, start.elapsed(), result.as_ref().err());

        match lease.release(&token).await {
            Ok(()) => info!("lease released"),
            Err(e) => warn!(error = %e, "could not release lease"),
        }

        if result.is_err() {
            progress.aborted(&summary);
        }
        result?;
        progress.done(&summary);
        Ok(RunOutcome::Completed(summary))
    }

    async fn run_locked(
        &self,
        progress: &dyn ProgressReporter,
        summary: &mut RunSummary,
    ) -> Result<()> {
        progress.phase("Extracting links");
        let rows = self.storage.list_roadmaps().await?;
        info!(roadmaps = rows.len(), "roadmaps fetched");

        let index = extract_links(&rows);
        summary.documents_skipped = index.documents_skipped;
        info!(
            unique = index.unique_count(),
            occurrences = index.occurrence_count(),
            "study links extracted"
        );

        progress.phase("Checking links");
        let total = index.unique_count();
        for (i, url) in index.urls().iter().enumerate() {
            debug!(current = i + 1, total, %url, "checking link");
            let check = self.checker.check(url).await;
            let status = check.status_label();
            summary.checked += 1;

            if check.is_valid() {
                summary.valid += 1;
                for occurrence in index.occurrences(url) {
                    self.heal(occurrence, &status, summary).await;
                }
            } else if check.status == CheckStatus::Blocked {
                summary.blocked += 1;
                info!(%url, "link points at a private address, not repairing");
            } else {
                summary.invalid += 1;
                for occurrence in index.occurrences(url) {
                    if let Err(e) = self.repair(occurrence, &status, summary).await {
                        summary.errors += 1;
                        warn!(
                            roadmap_id = %occurrence.roadmap_id,
                            stage = occurrence.stage_index,
                            step = occurrence.step_index,
                            error = %e,
                            "failed to process invalid link"
                        );
                    }
                }
            }

            progress.link_checked(url, i + 1, total);
            if i + 1 < total && !self.checker.delay().is_zero() {
                tokio::time::sleep(self.checker.delay()).await;
            }
        }
        Ok(())
    }

    /// Resolve any open record for an occurrence whose link answers again.
    async fn heal(&self, occurrence: &LinkOccurrence, status: &str, summary: &mut RunSummary) {
        match self.storage.mark_now_valid(occurrence, status, Utc::now()).await {
            Ok(0) => {}
            Ok(n) => {
                summary.now_valid += n;
                info!(
                    url = %occurrence.url,
                    roadmap_id = %occurrence.roadmap_id,
                    stage = occurrence.stage_index,
                    step = occurrence.step_index,
                    "previously invalid link is valid again"
                );
            }
            Err(e) => {
                summary.errors += 1;
                warn!(url = %occurrence.url, error = %e, "failed to resolve healed link");
            }
        }
    }

    /// Record one invalid occurrence, then try to replace it. An occurrence
    /// that is already on record gets a fresh attempt against that record.
    #[instrument(skip_all, fields(
        url = %occurrence.url,
        roadmap_id = %occurrence.roadmap_id,
        stage = occurrence.stage_index,
        step = occurrence.step_index,
    ))]
    async fn repair(
        &self,
        occurrence: &LinkOccurrence,
        status: &str,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let record_id = match self
            .storage
            .record_invalid(occurrence, status, Utc::now())
            .await?
        {
            Some(id) => {
                info!(record_id = id, %status, "invalid link logged");
                id
            }
            None => {
                summary.already_logged += 1;
                let Some(id) = self.storage.find_unresolved(occurrence).await? else {
                    // Resolved by a concurrent writer in between.
                    return Ok(());
                };
                debug!(record_id = id, "invalid link already logged, retrying replacement");
                id
            }
        };

        let Some(attempt) = self.finder.find_replacement(occurrence).await else {
            debug!("replacement disabled");
            return Ok(());
        };

        self.storage
            .attach_attempt(record_id, Some(&attempt.prompt), Some(&attempt.response))
            .await?;

        let Some(new_url) = attempt.new_url else {
            summary.ai_failed += 1;
            info!(record_id, "no replacement found");
            return Ok(());
        };

        match apply_replacement(self.storage, occurrence, record_id, &new_url).await? {
            PatchOutcome::Applied => summary.replaced += 1,
            PatchOutcome::Skipped(_) => summary.skipped_drift += 1,
        }
        Ok(())
    }
}

/// One line per run, whether it finished or stopped on `error`.
fn log_summary(summary: &RunSummary, elapsed: Duration, error: Option<&RoadmendError>) {
    let elapsed_ms = elapsed.as_millis() as u64;
    match error {
        None => info!(
            checked = summary.checked,
            valid = summary.valid,
            invalid = summary.invalid,
            blocked = summary.blocked,
            replaced = summary.replaced,
            ai_failed = summary.ai_failed,
            skipped_drift = summary.skipped_drift,
            already_logged = summary.already_logged,
            now_valid = summary.now_valid,
            documents_skipped = summary.documents_skipped,
            errors = summary.errors,
            elapsed_ms,
            "link validation finished"
        ),
        Some(e) => warn!(
            checked = summary.checked,
            valid = summary.valid,
            invalid = summary.invalid,
            blocked = summary.blocked,
            replaced = summary.replaced,
            ai_failed = summary.ai_failed,
            skipped_drift = summary.skipped_drift,
            already_logged = summary.already_logged,
            now_valid = summary.now_valid,
            documents_skipped = summary.documents_skipped,
            errors = summary.errors,
            elapsed_ms,
            error = %e,
            "link validation aborted"
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use roadmend_shared::{CheckConfig, NOW_VALID, RoadmapDocument};
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::generator::{GenerateFuture, TextGenerator};
    use crate::lock::{DatabaseLease, FileLease};
    use crate::test_support::{temp_db_path, test_storage};

    const MDN_CSS: &str = "https://developer.mozilla.org/en-US/docs/Web/CSS";

    /// Replies with a fixed text and counts calls.
    struct Canned {
        reply: String,
        calls: AtomicUsize,
    }

    impl Canned {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TextGenerator for Canned {
        fn generate<'a>(&'a self, _prompt: &'a str) -> GenerateFuture<'a> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = self.reply.clone();
            Box::pin(async move { Ok(reply) })
        }
    }

    /// Replies from a script, repeating the last entry once it runs out.
    struct Scripted {
        replies: Vec<&'static str>,
        calls: AtomicUsize,
    }

    impl TextGenerator for Scripted {
        fn generate<'a>(&'a self, _prompt: &'a str) -> GenerateFuture<'a> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = self.replies[n.min(self.replies.len() - 1)].to_string();
            Box::pin(async move { Ok(reply) })
        }
    }

    /// Remembers how the run ended.
    #[derive(Default)]
    struct Recording {
        done: Mutex<Option<RunSummary>>,
        aborted: Mutex<Option<RunSummary>>,
    }

    impl ProgressReporter for Recording {
        fn phase(&self, _name: &str) {}
        fn link_checked(&self, _url: &str, _current: usize, _total: usize) {}
        fn done(&self, summary: &RunSummary) {
            *self.done.lock().unwrap() = Some(summary.clone());
        }
        fn aborted(&self, summary: &RunSummary) {
            *self.aborted.lock().unwrap() = Some(summary.clone());
        }
    }

    /// Rewrites the roadmap through its own connection before answering,
    /// standing in for a user regenerating the roadmap mid-run.
    struct Drifting {
        storage: Storage,
        roadmap_id: String,
        replacement_json: String,
    }

    impl TextGenerator for Drifting {
        fn generate<'a>(&'a self, _prompt: &'a str) -> GenerateFuture<'a> {
            Box::pin(async move {
                self.storage
                    .write_roadmap(&self.roadmap_id, &self.replacement_json)
                    .await?;
                Ok(MDN_CSS.to_string())
            })
        }
    }

    fn checker_with(allow_private_hosts: bool) -> LinkChecker {
        LinkChecker::new(CheckConfig {
            timeout: Duration::from_secs(5),
            delay: Duration::ZERO,
            max_redirects: 5,
            user_agent: "Roadmend Test/1.0".into(),
            allow_private_hosts,
            fallback_get_on_405: false,
        })
        .unwrap()
    }

    fn checker() -> LinkChecker {
        checker_with(true)
    }

    fn lease() -> FileLease {
        FileLease::new(std::env::temp_dir().join(format!("rm_lock_{}.lock", Uuid::now_v7())))
    }

    fn roadmap_with(link: &str) -> String {
        serde_json::json!({
            "roadmap": [{
                "stage_title": "Stage 1",
                "steps": [
                    {"title": "Learn CSS", "description": "Style pages", "study_link": link}
                ]
            }]
        })
        .to_string()
    }

    async fn mount_status(server: &MockServer, route: &str, status: u16) {
        Mock::given(method("HEAD"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status))
            .mount(server)
            .await;
    }

    fn link_at(storage_json: &str) -> Option<String> {
        RoadmapDocument::parse(storage_json)
            .ok()?
            .step(0, 0)?
            .study_link()
            .map(str::to_string)
    }

    /// Break the store behind the pipeline's back so listing roadmaps fails.
    async fn drop_roadmaps_table(db_path: &Path) {
        let db = libsql::Builder::new_local(db_path).build().await.unwrap();
        db.connect()
            .unwrap()
            .execute("DROP TABLE roadmaps", ())
            .await
            .unwrap();
    }

    async fn run(storage: &Storage, finder: &ReplacementFinder) -> RunOutcome {
        let checker = checker();
        Pipeline::new(storage, &checker, finder)
            .run(&lease(), &SilentProgress)
            .await
            .expect("run")
    }

    fn completed(outcome: RunOutcome) -> RunSummary {
        match outcome {
            RunOutcome::Completed(summary) => summary,
            RunOutcome::Busy => panic!("expected a completed run"),
        }
    }

    #[tokio::test]
    async fn dead_link_is_replaced_and_resolved() {
        let server = MockServer::start().await;
        mount_status(&server, "/css", 404).await;
        let dead = format!("{}/css", server.uri());

        let storage = test_storage().await;
        storage
            .insert_roadmap("r1", Some("u1"), "Frontend Developer", &roadmap_with(&dead))
            .await
            .unwrap();

        let finder = ReplacementFinder::new(Canned::new(MDN_CSS), Duration::ZERO);
        let summary = completed(run(&storage, &finder).await);
        assert_eq!(summary.invalid, 1);
        assert_eq!(summary.replaced, 1);
        assert_eq!(summary.ai_failed, 0);

        let records = storage.list_invalid_links(true, 10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].original_url, dead);
        assert_eq!(records[0].status_code, "404");
        assert_eq!(records[0].new_url.as_deref(), Some(MDN_CSS));
        assert!(records[0].is_resolved());
        assert!(records[0].ai_prompt.as_deref().unwrap().contains("Learn CSS"));

        let json = storage.get_roadmap("r1").await.unwrap().unwrap();
        assert_eq!(link_at(&json).as_deref(), Some(MDN_CSS));
    }

    #[tokio::test]
    async fn shared_dead_url_is_checked_once_and_patched_per_document() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(410))
            .expect(1)
            .mount(&server)
            .await;
        let dead = format!("{}/gone", server.uri());

        let storage = test_storage().await;
        storage.insert_roadmap("r1", None, "Backend", &roadmap_with(&dead)).await.unwrap();
        storage.insert_roadmap("r2", None, "DevOps", &roadmap_with(&dead)).await.unwrap();

        let generator = Canned::new(MDN_CSS);
        let finder = ReplacementFinder::new(generator.clone(), Duration::ZERO);
        let summary = completed(run(&storage, &finder).await);

        assert_eq!(summary.checked, 1);
        assert_eq!(summary.invalid, 1);
        assert_eq!(summary.replaced, 2);
        assert_eq!(generator.calls(), 2);
        for id in ["r1", "r2"] {
            let json = storage.get_roadmap(id).await.unwrap().unwrap();
            assert_eq!(link_at(&json).as_deref(), Some(MDN_CSS));
        }
    }

    #[tokio::test]
    async fn rerun_retries_without_duplicating_records() {
        let server = MockServer::start().await;
        mount_status(&server, "/dead", 404).await;
        let dead = format!("{}/dead", server.uri());

        let storage = test_storage().await;
        storage.insert_roadmap("r1", None, "QA", &roadmap_with(&dead)).await.unwrap();

        let generator = Canned::new("NO_REPLACEMENT_FOUND");
        let finder = ReplacementFinder::new(generator.clone(), Duration::ZERO);

        let first = completed(run(&storage, &finder).await);
        assert_eq!(first.ai_failed, 1);
        let second = completed(run(&storage, &finder).await);
        assert_eq!(second.already_logged, 1);
        assert_eq!(second.ai_failed, 1);

        assert_eq!(storage.list_invalid_links(true, 10).await.unwrap().len(), 1);
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn failed_attempt_is_retried_and_patched_on_next_run() {
        let server = MockServer::start().await;
        mount_status(&server, "/dead", 404).await;
        let dead = format!("{}/dead", server.uri());

        let storage = test_storage().await;
        storage.insert_roadmap("r1", None, "QA", &roadmap_with(&dead)).await.unwrap();

        let generator = Arc::new(Scripted {
            replies: vec!["Error: upstream timed out", MDN_CSS],
            calls: AtomicUsize::new(0),
        });
        let finder = ReplacementFinder::new(generator.clone(), Duration::ZERO);

        let first = completed(run(&storage, &finder).await);
        assert_eq!(first.ai_failed, 1);
        assert_eq!(first.replaced, 0);

        let second = completed(run(&storage, &finder).await);
        assert_eq!(second.already_logged, 1);
        assert_eq!(second.replaced, 1);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);

        let records = storage.list_invalid_links(true, 10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].is_resolved());
        assert_eq!(records[0].new_url.as_deref(), Some(MDN_CSS));
        assert_eq!(records[0].ai_response.as_deref(), Some(MDN_CSS));

        let json = storage.get_roadmap("r1").await.unwrap().unwrap();
        assert_eq!(link_at(&json).as_deref(), Some(MDN_CSS));
    }

    #[tokio::test]
    async fn odd_sibling_fields_do_not_block_repair() {
        let server = MockServer::start().await;
        mount_status(&server, "/css", 404).await;
        let dead = format!("{}/css", server.uri());

        let original = serde_json::json!({
            "roadmap": [{
                "stage_title": "Stage 1",
                "steps": [
                    {"title": "Watch", "resource_type": ["Video", "Docs"], "study_link": null},
                    {"title": "Count", "study_link": 42},
                    {"title": "Learn CSS", "description": null, "study_link": dead}
                ]
            }]
        })
        .to_string();
        let storage = test_storage().await;
        storage.insert_roadmap("r1", None, "Frontend", &original).await.unwrap();

        let finder = ReplacementFinder::new(Canned::new(MDN_CSS), Duration::ZERO);
        let summary = completed(run(&storage, &finder).await);
        assert_eq!(summary.documents_skipped, 0);
        assert_eq!(summary.invalid, 1);
        assert_eq!(summary.replaced, 1);

        let json = storage.get_roadmap("r1").await.unwrap().unwrap();
        assert_eq!(json, original.replace(&dead, MDN_CSS));
    }

    #[tokio::test]
    async fn private_address_is_not_sent_for_repair() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(404))
            .expect(0)
            .mount(&server)
            .await;
        let internal = format!("{}/internal", server.uri());

        let storage = test_storage().await;
        storage.insert_roadmap("r1", None, "Ops", &roadmap_with(&internal)).await.unwrap();

        let generator = Canned::new(MDN_CSS);
        let finder = ReplacementFinder::new(generator.clone(), Duration::ZERO);
        let checker = checker_with(false);
        let summary = completed(
            Pipeline::new(&storage, &checker, &finder)
                .run(&lease(), &SilentProgress)
                .await
                .unwrap(),
        );

        assert_eq!(summary.checked, 1);
        assert_eq!(summary.blocked, 1);
        assert_eq!(summary.invalid, 0);
        assert_eq!(generator.calls(), 0);
        assert!(storage.list_invalid_links(true, 10).await.unwrap().is_empty());
        let json = storage.get_roadmap("r1").await.unwrap().unwrap();
        assert_eq!(link_at(&json), Some(internal));
    }

    #[tokio::test]
    async fn failed_run_releases_file_lease() {
        let db_path = temp_db_path();
        let storage = Storage::open(&db_path).await.unwrap();
        drop_roadmaps_table(&db_path).await;

        let lock_path = std::env::temp_dir().join(format!("rm_lock_{}.lock", Uuid::now_v7()));
        let lease = FileLease::new(&lock_path);
        let checker = checker();
        let finder = ReplacementFinder::disabled();
        let progress = Recording::default();
        let result = Pipeline::new(&storage, &checker, &finder)
            .run(&lease, &progress)
            .await;
        assert!(result.is_err());
        assert!(progress.done.lock().unwrap().is_none());
        assert_eq!(*progress.aborted.lock().unwrap(), Some(RunSummary::default()));

        // `lease` is still alive, so only an explicit release frees the file.
        let fresh = FileLease::new(&lock_path);
        let token = fresh.try_acquire().await.unwrap().expect("lock free after failed run");
        fresh.release(&token).await.unwrap();
    }

    #[tokio::test]
    async fn failed_run_releases_database_lease() {
        let db_path = temp_db_path();
        let storage = Storage::open(&db_path).await.unwrap();
        drop_roadmaps_table(&db_path).await;

        let lease = DatabaseLease::new(&storage, "repair", Duration::from_secs(600));
        let checker = checker();
        let finder = ReplacementFinder::disabled();
        let result = Pipeline::new(&storage, &checker, &finder)
            .run(&lease, &SilentProgress)
            .await;
        assert!(result.is_err());

        assert!(storage.lease_holder("repair").await.unwrap().is_none());
        let again = DatabaseLease::new(&storage, "repair", Duration::from_secs(600));
        assert!(again.try_acquire().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn recovered_link_is_marked_now_valid() {
        let server = MockServer::start().await;
        mount_status(&server, "/flaky", 503).await;
        let flaky = format!("{}/flaky", server.uri());

        let storage = test_storage().await;
        storage.insert_roadmap("r1", None, "ML", &roadmap_with(&flaky)).await.unwrap();

        let generator = Canned::new("NO_REPLACEMENT_FOUND");
        let finder = ReplacementFinder::new(generator.clone(), Duration::ZERO);
        completed(run(&storage, &finder).await);

        server.reset().await;
        mount_status(&server, "/flaky", 200).await;

        let summary = completed(run(&storage, &finder).await);
        assert_eq!(summary.valid, 1);
        assert_eq!(summary.now_valid, 1);
        assert_eq!(generator.calls(), 1);

        let records = storage.list_invalid_links(true, 10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].new_url.as_deref(), Some(NOW_VALID));
        assert_eq!(records[0].status_code, "200");
        assert!(records[0].is_resolved());
        // The document itself is left alone.
        let json = storage.get_roadmap("r1").await.unwrap().unwrap();
        assert_eq!(link_at(&json), Some(flaky));
    }

    #[tokio::test]
    async fn busy_lease_touches_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(404))
            .expect(0)
            .mount(&server)
            .await;
        let dead = format!("{}/x", server.uri());

        let storage = test_storage().await;
        storage.insert_roadmap("r1", None, "SRE", &roadmap_with(&dead)).await.unwrap();

        let lock_path = std::env::temp_dir().join(format!("rm_lock_{}.lock", Uuid::now_v7()));
        let holder = FileLease::new(&lock_path);
        let token = holder.try_acquire().await.unwrap().expect("holder acquires");

        let generator = Canned::new(MDN_CSS);
        let finder = ReplacementFinder::new(generator.clone(), Duration::ZERO);
        let checker = checker();
        let outcome = Pipeline::new(&storage, &checker, &finder)
            .run(&FileLease::new(&lock_path), &SilentProgress)
            .await
            .unwrap();

        assert_eq!(outcome, RunOutcome::Busy);
        assert_eq!(generator.calls(), 0);
        assert!(storage.list_invalid_links(true, 10).await.unwrap().is_empty());
        let json = storage.get_roadmap("r1").await.unwrap().unwrap();
        assert_eq!(link_at(&json), Some(dead));

        holder.release(&token).await.unwrap();
    }

    #[tokio::test]
    async fn drifted_document_is_not_overwritten() {
        let server = MockServer::start().await;
        mount_status(&server, "/css", 404).await;
        let dead = format!("{}/css", server.uri());

        let db_path = temp_db_path();
        let storage = Storage::open(&db_path).await.unwrap();
        storage.insert_roadmap("r1", None, "Frontend", &roadmap_with(&dead)).await.unwrap();

        let regenerated = roadmap_with("https://user.example/regenerated");
        let generator = Arc::new(Drifting {
            storage: Storage::open(&db_path).await.unwrap(),
            roadmap_id: "r1".into(),
            replacement_json: regenerated.clone(),
        });
        let finder = ReplacementFinder::new(generator, Duration::ZERO);

        let summary = completed(run(&storage, &finder).await);
        assert_eq!(summary.skipped_drift, 1);
        assert_eq!(summary.replaced, 0);

        assert_eq!(storage.get_roadmap("r1").await.unwrap().unwrap(), regenerated);
        let records = storage.list_invalid_links(true, 10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(!records[0].is_resolved());
        assert_eq!(records[0].ai_response.as_deref(), Some(MDN_CSS));
    }

    #[tokio::test]
    async fn malformed_answers_are_never_patched() {
        let server = MockServer::start().await;
        mount_status(&server, "/a", 404).await;
        mount_status(&server, "/b", 404).await;
        mount_status(&server, "/c", 404).await;

        for (route, reply) in [
            ("/a", "NO_REPLACEMENT_FOUND"),
            ("/b", "Try https://react.dev/learn instead"),
            ("/c", "react.dev/learn"),
        ] {
            let dead = format!("{}{route}", server.uri());
            let storage = test_storage().await;
            storage.insert_roadmap("r1", None, "Web", &roadmap_with(&dead)).await.unwrap();

            let finder = ReplacementFinder::new(Canned::new(reply), Duration::ZERO);
            let summary = completed(run(&storage, &finder).await);
            assert_eq!(summary.ai_failed, 1, "{reply}");
            assert_eq!(summary.replaced, 0, "{reply}");

            let json = storage.get_roadmap("r1").await.unwrap().unwrap();
            assert_eq!(link_at(&json), Some(dead));
            let records = storage.list_invalid_links(false, 10).await.unwrap();
            assert_eq!(records[0].ai_response.as_deref(), Some(reply));
        }
    }

    #[tokio::test]
    async fn corrupt_document_does_not_abort_the_run() {
        let server = MockServer::start().await;
        mount_status(&server, "/ok", 200).await;
        let ok = format!("{}/ok", server.uri());

        let storage = test_storage().await;
        storage.insert_roadmap("broken", None, "X", "{oops").await.unwrap();
        storage.insert_roadmap("r1", None, "Y", &roadmap_with(&ok)).await.unwrap();

        let summary = completed(run(&storage, &ReplacementFinder::disabled()).await);
        assert_eq!(summary.documents_skipped, 1);
        assert_eq!(summary.valid, 1);
        assert_eq!(summary.errors, 0);
    }

    #[tokio::test]
    async fn disabled_replacement_still_records() {
        let server = MockServer::start().await;
        mount_status(&server, "/dead", 404).await;
        let dead = format!("{}/dead", server.uri());

        let storage = test_storage().await;
        storage.insert_roadmap("r1", None, "Z", &roadmap_with(&dead)).await.unwrap();

        let summary = completed(run(&storage, &ReplacementFinder::disabled()).await);
        assert_eq!(summary.invalid, 1);
        assert_eq!(summary.ai_failed, 0);

        let records = storage.list_invalid_links(false, 10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].ai_prompt.is_none());
    }

    #[tokio::test]
    async fn empty_catalogue_completes() {
        let storage = test_storage().await;
        let summary = completed(run(&storage, &ReplacementFinder::disabled()).await);
        assert_eq!(summary, RunSummary::default());
    }
}
