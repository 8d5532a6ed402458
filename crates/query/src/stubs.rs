//! In-memory collaborators with call counters, for tests here and in
//! downstream crates (feature `test-util`).

use anyhow::Result;
use async_trait::async_trait;
use extract::Period;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::SourceError;
use crate::llm::GenerationOracle;
use crate::sources::{FundDatabase, FundRecord, SchemeRecord, SchemeRegistry, SearchSnippet, WebSearch};

/// Serves a fixed result, optionally after `failures` transient timeouts.
struct Canned<T> {
    result: Result<Vec<T>, SourceError>,
    failures: usize,
    calls: AtomicUsize,
}

impl<T: Clone> Canned<T> {
    fn new(result: Result<Vec<T>, SourceError>, failures: usize) -> Self {
        Self {
            result,
            failures,
            calls: AtomicUsize::new(0),
        }
    }

    fn next(&self) -> Result<Vec<T>, SourceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(SourceError::Timeout);
        }
        self.result.clone()
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub struct StubFundDatabase {
    canned: Canned<FundRecord>,
}

impl StubFundDatabase {
    pub fn with(funds: Vec<FundRecord>) -> Self {
        Self { canned: Canned::new(Ok(funds), 0) }
    }

    pub fn empty() -> Self {
        Self::with(Vec::new())
    }

    pub fn failing(error: SourceError) -> Self {
        Self { canned: Canned::new(Err(error), 0) }
    }

    /// Times out `failures` times, then serves `funds`.
    pub fn flaky(failures: usize, funds: Vec<FundRecord>) -> Self {
        Self { canned: Canned::new(Ok(funds), failures) }
    }

    pub fn calls(&self) -> usize {
        self.canned.calls()
    }
}

#[async_trait]
impl FundDatabase for StubFundDatabase {
    async fn search(&self, _name: &str) -> Result<Vec<FundRecord>, SourceError> {
        self.canned.next()
    }

    async fn by_isin(&self, isin: &str) -> Result<Option<FundRecord>, SourceError> {
        let funds = self.canned.next()?;
        Ok(funds
            .into_iter()
            .find(|f| f.isin.as_deref().is_some_and(|i| i.eq_ignore_ascii_case(isin))))
    }

    async fn top_performers(&self, _period: Period) -> Result<Vec<FundRecord>, SourceError> {
        self.canned.next()
    }
}

pub struct StubSchemeRegistry {
    canned: Canned<SchemeRecord>,
}

impl StubSchemeRegistry {
    pub fn with(schemes: Vec<SchemeRecord>) -> Self {
        Self { canned: Canned::new(Ok(schemes), 0) }
    }

    pub fn empty() -> Self {
        Self::with(Vec::new())
    }

    pub fn failing(error: SourceError) -> Self {
        Self { canned: Canned::new(Err(error), 0) }
    }

    pub fn calls(&self) -> usize {
        self.canned.calls()
    }
}

#[async_trait]
impl SchemeRegistry for StubSchemeRegistry {
    async fn by_isin(&self, _isin: &str) -> Result<Vec<SchemeRecord>, SourceError> {
        self.canned.next()
    }

    async fn search(&self, _scheme_name: &str) -> Result<Vec<SchemeRecord>, SourceError> {
        self.canned.next()
    }
}

pub struct StubWebSearch {
    canned: Canned<SearchSnippet>,
}

impl StubWebSearch {
    pub fn with(snippets: Vec<SearchSnippet>) -> Self {
        Self { canned: Canned::new(Ok(snippets), 0) }
    }

    pub fn empty() -> Self {
        Self::with(Vec::new())
    }

    pub fn failing(error: SourceError) -> Self {
        Self { canned: Canned::new(Err(error), 0) }
    }

    pub fn calls(&self) -> usize {
        self.canned.calls()
    }
}

#[async_trait]
impl WebSearch for StubWebSearch {
    async fn search(
        &self,
        _query: &str,
        _domains: &[String],
        _max_results: usize,
    ) -> Result<Vec<SearchSnippet>, SourceError> {
        self.canned.next()
    }
}

type Responder = Box<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// Oracle whose reply is a function of the prompt. Records every prompt
/// and temperature it receives.
pub struct StubOracle {
    responder: Responder,
    calls: AtomicUsize,
    prompts: Mutex<Vec<(String, f32)>>,
}

impl StubOracle {
    pub fn from_fn(f: impl Fn(&str) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(f),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn fixed(reply: &str) -> Self {
        let reply = reply.to_string();
        Self::from_fn(move |_| Ok(reply.clone()))
    }

    pub fn failing(message: &str) -> Self {
        let message = message.to_string();
        Self::from_fn(move |_| Err(anyhow::anyhow!("{}", message)))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<(String, f32)> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl GenerationOracle for StubOracle {
    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push((prompt.to_string(), temperature));
        }
        (self.responder)(prompt)
    }

    fn model_name(&self) -> &str {
        "stub-model"
    }
}
