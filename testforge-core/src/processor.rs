use crate::ai::AiClient;
use crate::analytics::ResultAnalytics;
use crate::archive::{self, ArchiveMeta, RepairReport};
use crate::config::GeneratorConfig;
use crate::diagnostics::{input_hash, DiagnosticsStore, FileDiagnostics};
use crate::error::{ErrorKind, GenerationError};
use crate::normalizer::{self, Normalizer};
use crate::parser::{self, ParseOptions};
use crate::prompter;
use crate::types::*;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{error, info, info_span, warn};

/// Where a generation run is. States are only ever entered once, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Normalizing,
    Extracting,
    Parsing,
    Building,
    Done,
    Failed(ErrorKind),
}

impl PipelineState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Normalizing => "normalizing",
            Self::Extracting => "extracting",
            Self::Parsing => "parsing",
            Self::Building => "building",
            Self::Done => "done",
            Self::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Simple profiler that collects timings for pipeline steps
#[derive(Debug, Default)]
pub struct StepProfiler {
    timings: Vec<(String, Duration)>,
}

impl StepProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn time_step<F, R>(&mut self, step_name: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = Instant::now();
        let result = f();
        let elapsed = start.elapsed();

        info!(stage = step_name, elapsed_ms = elapsed.as_millis() as u64, "stage finished");
        self.timings.push((step_name.to_string(), elapsed));
        result
    }

    pub fn total(&self) -> Duration {
        self.timings.iter().map(|(_, d)| *d).sum()
    }

    pub fn into_timings(self) -> Vec<(String, Duration)> {
        self.timings
    }
}

/// Called on every state transition with an approximate completion percentage
pub type ProgressCallback = Box<dyn Fn(PipelineState, u8) + Send + Sync>;

/// Everything a successful run produced
#[derive(Debug, Clone)]
pub struct GenerationReport {
    pub result: GenerationResult,
    pub archive_path: PathBuf,
    pub repair: RepairReport,
    pub timings: Vec<(String, Duration)>,
    pub states: Vec<PipelineState>,
}

/// A run that stopped at `stage`
#[derive(Debug)]
pub struct GenerationFailure {
    pub stage: PipelineState,
    pub error: GenerationError,
    pub states: Vec<PipelineState>,
}

impl GenerationFailure {
    pub fn stage(&self) -> PipelineState {
        self.stage
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

impl fmt::Display for GenerationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "generation failed while {}: {}", self.stage, self.error)
    }
}

impl std::error::Error for GenerationFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[derive(Debug)]
pub enum GenerationOutcome {
    Success(GenerationReport),
    Failure(GenerationFailure),
}

impl GenerationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn states(&self) -> &[PipelineState] {
        match self {
            Self::Success(report) => &report.states,
            Self::Failure(failure) => &failure.states,
        }
    }

    pub fn into_result(self) -> Result<GenerationReport, GenerationFailure> {
        match self {
            Self::Success(report) => Ok(report),
            Self::Failure(failure) => Err(failure),
        }
    }
}

/// State sequence of one run plus progress reporting
struct RunTracker<'a> {
    states: Vec<PipelineState>,
    percent: u8,
    progress: Option<&'a (dyn Fn(PipelineState, u8) + Send + Sync)>,
}

impl<'a> RunTracker<'a> {
    fn new(progress: Option<&'a (dyn Fn(PipelineState, u8) + Send + Sync)>) -> Self {
        Self {
            states: vec![PipelineState::Idle],
            percent: 0,
            progress,
        }
    }

    fn current(&self) -> PipelineState {
        self.states.last().copied().unwrap_or(PipelineState::Idle)
    }

    fn enter(&mut self, state: PipelineState, percent: u8) {
        self.states.push(state);
        self.percent = percent;
        info!(stage = state.name(), percent, "pipeline state");
        if let Some(callback) = self.progress {
            callback(state, percent);
        }
    }
}

/// Intermediate outcome of the stages before `Done`
struct Built {
    result: GenerationResult,
    archive_path: PathBuf,
    repair: RepairReport,
}

/// Runs one document through normalize → extract → parse → build.
///
/// Holds configuration and collaborators only, no per-run state, so
/// `generate` takes `&self` and separate documents can run concurrently.
pub struct TestCaseGenerator {
    normalizers: Vec<Box<dyn Normalizer>>,
    client: AiClient,
    config: GeneratorConfig,
    diagnostics: Option<Box<dyn DiagnosticsStore>>,
    progress: Option<ProgressCallback>,
}

impl TestCaseGenerator {
    /// Create TestCaseGenerator with full dependency injection
    pub fn new_with_dependencies(
        normalizers: Vec<Box<dyn Normalizer>>,
        client: AiClient,
        config: GeneratorConfig,
    ) -> Self {
        Self {
            normalizers,
            client,
            config,
            diagnostics: None,
            progress: None,
        }
    }

    /// Default normalizers, the configured backend, and diagnostics when a directory is set
    pub fn from_config(config: GeneratorConfig) -> Self {
        let client = AiClient::from_config(&config);
        let diagnostics_dir = config.diagnostics_dir.clone();
        let mut generator = Self::new_with_dependencies(normalizer::default_normalizers(), client, config);

        if let Some(dir) = diagnostics_dir {
            match FileDiagnostics::new(&dir) {
                Ok(store) => generator = generator.with_diagnostics(Box::new(store)),
                Err(e) => warn!(dir = %dir.display(), error = %e, "diagnostics disabled"),
            }
        }
        generator
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn with_diagnostics(mut self, store: Box<dyn DiagnosticsStore>) -> Self {
        self.diagnostics = Some(store);
        self
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Run the whole pipeline. Never panics past this boundary on bad input;
    /// every failure comes back as `GenerationOutcome::Failure`.
    pub fn generate(&self, request: GenerationRequest) -> GenerationOutcome {
        let span = info_span!("testforge.generate", document = %request.document_path.display());
        let _guard = span.enter();

        let mut tracker = RunTracker::new(self.progress.as_deref());
        let mut profiler = StepProfiler::new();

        match self.run_stages(&request, &mut tracker, &mut profiler) {
            Ok(built) => {
                tracker.enter(PipelineState::Done, 100);
                info!(
                    archive = %built.archive_path.display(),
                    cases = built.result.statistics.total_cases,
                    total_ms = profiler.total().as_millis() as u64,
                    "generation complete"
                );
                GenerationOutcome::Success(GenerationReport {
                    result: built.result,
                    archive_path: built.archive_path,
                    repair: built.repair,
                    timings: profiler.into_timings(),
                    states: tracker.states,
                })
            }
            Err(err) => {
                let stage = tracker.current();
                let kind = err.kind();
                error!(stage = stage.name(), error = %err, "generation failed");
                let percent = tracker.percent;
                tracker.enter(PipelineState::Failed(kind), percent);
                GenerationOutcome::Failure(GenerationFailure {
                    stage,
                    error: err,
                    states: tracker.states,
                })
            }
        }
    }

    fn run_stages(
        &self,
        request: &GenerationRequest,
        tracker: &mut RunTracker<'_>,
        profiler: &mut StepProfiler,
    ) -> Result<Built, GenerationError> {
        // Normalizing
        tracker.enter(PipelineState::Normalizing, 10);
        let max_bytes = self.config.input.max_bytes();
        let (document, stem, diag_key) = profiler.time_step("normalize", || {
            let loaded = normalizer::read_document(&request.document_path, max_bytes)?;
            let diag_key = self.diagnostics.as_ref().map(|_| input_hash(&loaded.bytes));
            let document = normalizer::normalize_with(&self.normalizers, &loaded)?;
            Ok::<_, GenerationError>((document, loaded.stem, diag_key))
        })?;
        info!(
            title = %document.title,
            blocks = document.blocks.len(),
            headings = document.heading_count(),
            "document normalized"
        );
        self.capture(diag_key.as_deref(), |store, key| store.store_blocks(key, &document.blocks));

        // Extracting
        tracker.enter(PipelineState::Extracting, 30);
        let extraction = ExtractionRequest {
            document_title: document.title.clone(),
            content_blocks: document.blocks,
            enable_defect_detection: request.enable_defect_detection,
            enable_question_generation: request.enable_question_generation,
            model_backend: self.config.backend,
            max_content_chars: self.config.prompt.max_content_chars,
        };
        let payload = prompter::build_payload(&extraction);
        self.capture(diag_key.as_deref(), |store, key| store.store_prompt(key, &payload));
        let raw = profiler.time_step("extract", || self.client.complete(&payload))?;
        self.capture(diag_key.as_deref(), |store, key| store.store_raw_response(key, &raw));

        // Parsing
        tracker.enter(PipelineState::Parsing, 70);
        let options = ParseOptions {
            document_title: document.title,
            enable_defect_detection: request.enable_defect_detection,
            enable_question_generation: request.enable_question_generation,
        };
        let parsed = profiler.time_step("parse", || parser::parse_model_output(&raw, &options))?;
        let statistics = ResultAnalytics::compute(&parsed.tree, &parsed.questions, &parsed.defects);
        let result = GenerationResult {
            test_tree: parsed.tree,
            questions: parsed.questions,
            defects: parsed.defects,
            statistics,
        };

        // Building
        tracker.enter(PipelineState::Building, 85);
        let archive_path = request
            .output_path
            .clone()
            .unwrap_or_else(|| self.default_output_path(&stem));
        let meta = ArchiveMeta::from_config(&self.config.archive);
        let repair = profiler.time_step("build", || {
            archive::build_archive(&result, &meta, &archive_path)?;
            archive::repair(&archive_path, &meta).map_err(|e| {
                // the archive was complete but could not be verified
                if let Err(remove_err) = std::fs::remove_file(&archive_path) {
                    warn!(error = %remove_err, "could not remove unverified archive");
                }
                e
            })
        })?;
        if repair.changed {
            warn!(synthesized = ?repair.synthesized, "freshly built archive needed repair");
        }

        Ok(Built {
            result,
            archive_path,
            repair,
        })
    }

    fn default_output_path(&self, stem: &str) -> PathBuf {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        self.config.output_dir.join(format!("{stem}_testcases_{stamp}.xmind"))
    }

    /// Best-effort diagnostics write; failures are logged and ignored
    fn capture<F>(&self, key: Option<&str>, write: F)
    where
        F: FnOnce(&dyn DiagnosticsStore, &str) -> anyhow::Result<()>,
    {
        if let (Some(store), Some(key)) = (self.diagnostics.as_deref(), key) {
            if let Err(e) = write(store, key) {
                warn!(error = %e, "failed to write diagnostics");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{CompletionBackend, RetryPolicy};
    use crate::error::BackendError;
    use crate::normalizer::docx::fixtures::build_docx;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    struct Canned(String);

    impl CompletionBackend for Canned {
        fn complete(&self, _payload: &str) -> Result<String, BackendError> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &str {
            "canned"
        }
    }

    const REPLY: &str = r#"{"modules":[{"module_name":"Login","test_cases":[
        {"title":"valid password","category":"functional","scenario":"normal","confidence":0.9},
        {"title":"locked account","category":"security","scenario":"exception","confidence":0.5}
    ]}]}"#;

    fn generator(dir: &Path, reply: &str) -> TestCaseGenerator {
        let config = GeneratorConfig {
            output_dir: dir.join("out"),
            ..GeneratorConfig::default()
        };
        TestCaseGenerator::new_with_dependencies(
            normalizer::default_normalizers(),
            AiClient::new(Box::new(Canned(reply.to_string())), RetryPolicy::immediate(3)),
            config,
        )
    }

    fn write_docx(dir: &Path) -> PathBuf {
        let path = dir.join("login.docx");
        let bytes = build_docx(&[("1", "Login"), ("", "Users sign in with a password.")], &[]);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn success_visits_states_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let gen = generator(dir.path(), REPLY).with_progress(Box::new(move |state, percent| {
            sink.lock().unwrap().push((state, percent));
        }));

        let report = gen
            .generate(GenerationRequest::new(write_docx(dir.path())))
            .into_result()
            .unwrap();

        assert_eq!(
            report.states,
            vec![
                PipelineState::Idle,
                PipelineState::Normalizing,
                PipelineState::Extracting,
                PipelineState::Parsing,
                PipelineState::Building,
                PipelineState::Done,
            ]
        );
        assert_eq!(report.result.statistics.total_cases, 2);
        assert!(report.archive_path.starts_with(dir.path().join("out")));
        assert!(report.archive_path.to_string_lossy().contains("login_testcases_"));
        assert!(report.repair.is_clean());
        assert_eq!(report.timings.len(), 4);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.last(), Some(&(PipelineState::Done, 100)));
        assert!(seen.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn malformed_reply_fails_in_parsing_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("never.xmind");
        let failure = generator(dir.path(), "sorry, no JSON today")
            .generate(GenerationRequest::new(write_docx(dir.path())).with_output(&out))
            .into_result()
            .unwrap_err();

        assert_eq!(failure.stage(), PipelineState::Parsing);
        assert_eq!(failure.kind(), ErrorKind::ExtractionError);
        assert_eq!(
            failure.states.last(),
            Some(&PipelineState::Failed(ErrorKind::ExtractionError))
        );
        assert!(failure.to_string().contains("parsing"));
        assert!(!out.exists());
    }

    #[test]
    fn diagnostics_are_captured_even_when_parsing_fails() {
        let dir = tempfile::tempdir().unwrap();
        let diag_root = dir.path().join("diag");
        let doc = write_docx(dir.path());
        let gen = generator(dir.path(), "not json")
            .with_diagnostics(Box::new(FileDiagnostics::new(&diag_root).unwrap()));

        assert!(!gen.generate(GenerationRequest::new(&doc)).is_success());

        let run = diag_root.join(input_hash(&std::fs::read(&doc).unwrap()));
        assert!(run.join("blocks.json").is_file());
        assert!(run.join("prompt.txt").is_file());
        assert_eq!(std::fs::read_to_string(run.join("raw_response.txt")).unwrap(), "not json");
    }
}
