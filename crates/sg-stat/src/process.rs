use std::collections::HashMap;
use std::sync::Arc;

use orion_error::StructError;

use sg_config::{StatBackendKind, StatConfig};
use sg_core::Task;
use sg_net::RedisPool;

use crate::backend::{MemoryStatBackend, RedisStatBackend, StatBackend};
use crate::classifier::{BayesClassifier, Verdict};
use crate::error::{StatReason, StatResult};
use crate::learn_cache::{CacheVerdict, LearnCache, MemoryLearnCache};
use crate::tokenize::TokenizerSet;

// ---------------------------------------------------------------------------
// Runtime shapes
// ---------------------------------------------------------------------------

struct StatfileRuntime {
    label: String,
    spam: bool,
    backend: Arc<dyn StatBackend>,
}

struct ClassifierRuntime {
    name: String,
    tokenizer: String,
    min_tokens: u32,
    max_tokens: u32,
    spam_symbol: String,
    ham_symbol: String,
    statfiles: Vec<StatfileRuntime>,
}

/// Pre-classification hook: may substitute the active statfile label list
/// for this task.
pub type PreCallback = dyn Fn(&Task) -> Option<Vec<String>> + Send + Sync;

/// One classifier's verdict on a task, ready for symbol insertion.
#[derive(Debug, Clone)]
pub struct ClassifyOutcome {
    pub classifier: String,
    pub symbol: String,
    pub weight: f64,
    pub verdict: Verdict,
}

// ---------------------------------------------------------------------------
// StatContext
// ---------------------------------------------------------------------------

/// The statistics pipeline: tokenizer runtimes, per-statfile backends,
/// the Bayes classifier and the learn cache, wired from the `[stat]`
/// config section at bootstrap.
pub struct StatContext {
    classifiers: Vec<ClassifierRuntime>,
    learn_cache: Arc<dyn LearnCache>,
    strict: bool,
    pre_callbacks: HashMap<String, Arc<PreCallback>>,
}

impl StatContext {
    pub async fn from_config(config: &StatConfig, pool: Arc<RedisPool>) -> StatResult<Self> {
        let mut classifiers = Vec::with_capacity(config.classifiers.len());
        for cl in &config.classifiers {
            let mut statfiles = Vec::with_capacity(cl.statfiles.len());
            for sf in &cl.statfiles {
                let backend: Arc<dyn StatBackend> = match &sf.backend {
                    StatBackendKind::Memory => Arc::new(MemoryStatBackend::new()),
                    StatBackendKind::Redis { server, prefix } => {
                        Arc::new(RedisStatBackend::new(server, prefix, Arc::clone(&pool))?)
                    }
                };
                backend.open(&sf.label).await?;
                statfiles.push(StatfileRuntime {
                    label: sf.label.clone(),
                    spam: sf.spam,
                    backend,
                });
            }
            classifiers.push(ClassifierRuntime {
                name: cl.name.clone(),
                tokenizer: cl.tokenizer.clone(),
                min_tokens: cl.min_tokens,
                max_tokens: cl.max_tokens,
                spam_symbol: cl.spam_symbol.clone(),
                ham_symbol: cl.ham_symbol.clone(),
                statfiles,
            });
        }
        Ok(Self {
            classifiers,
            learn_cache: Arc::new(MemoryLearnCache::new()),
            strict: config.strict_tokens,
            pre_callbacks: HashMap::new(),
        })
    }

    /// Install a pre-classification callback for one classifier.
    pub fn set_pre_callback(&mut self, classifier: &str, callback: Arc<PreCallback>) {
        self.pre_callbacks.insert(classifier.to_string(), callback);
    }

    pub fn has_classifiers(&self) -> bool {
        !self.classifiers.is_empty()
    }

    pub fn classifier_names(&self) -> Vec<&str> {
        self.classifiers.iter().map(|c| c.name.as_str()).collect()
    }

    /// Statfile stats for the controller output.
    pub async fn statfile_stats(&self) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        for cl in &self.classifiers {
            for sf in &cl.statfiles {
                if let Ok(stat) = sf.backend.get_stat(&sf.label).await {
                    out.push(stat);
                }
            }
        }
        out
    }

    /// Classify the task's message with every configured classifier.
    pub async fn classify(&self, task: &Task) -> StatResult<Vec<ClassifyOutcome>> {
        let Some(message) = task.message() else {
            return Ok(Vec::new());
        };
        let mut tokenizers = TokenizerSet::new();
        let mut outcomes = Vec::new();

        for cl in &self.classifiers {
            let active = self.active_statfiles(cl, task);
            if active.is_empty() {
                continue;
            }

            let runtime = tokenizers.get_or_create(&cl.tokenizer, message, self.strict);
            if (runtime.tokens.len() as u32) < cl.min_tokens {
                tracing::debug!(
                    classifier = %cl.name,
                    tokens = runtime.tokens.len(),
                    min = cl.min_tokens,
                    "skipping classification: too few tokens"
                );
                continue;
            }
            let mut limit = runtime.tokens.len();
            if cl.max_tokens > 0 {
                limit = limit.min(cl.max_tokens as usize);
            }

            // Pre-fetch counts: one slot per active statfile.
            for token in runtime.tokens.iter_mut() {
                token.counts = vec![0; active.len()];
            }
            let mut spam_slots = Vec::new();
            let mut ham_slots = Vec::new();
            let mut spam_learns = 0u64;
            let mut ham_learns = 0u64;
            for (slot, sf) in active.iter().enumerate() {
                sf.backend
                    .process_tokens(&sf.label, &mut runtime.tokens[..limit], slot)
                    .await?;
                let learns = sf.backend.total_learns(&sf.label).await?;
                if sf.spam {
                    spam_slots.push(slot);
                    spam_learns += learns;
                } else {
                    ham_slots.push(slot);
                    ham_learns += learns;
                }
            }

            let verdict = BayesClassifier::classify(
                &runtime.tokens[..limit],
                &spam_slots,
                &ham_slots,
                spam_learns,
                ham_learns,
            );
            if verdict.evidence_tokens == 0 {
                continue;
            }
            let symbol = if verdict.is_spam() {
                cl.spam_symbol.clone()
            } else {
                cl.ham_symbol.clone()
            };
            outcomes.push(ClassifyOutcome {
                classifier: cl.name.clone(),
                symbol,
                weight: verdict.confidence(),
                verdict,
            });
        }
        Ok(outcomes)
    }

    /// Learn the task's message as spam or ham. `classifier` narrows to a
    /// named classifier; an unknown name is an error the protocol maps to
    /// its 404 equivalent.
    pub async fn learn(
        &self,
        task: &Task,
        classifier: Option<&str>,
        is_spam: bool,
    ) -> StatResult<()> {
        let Some(message) = task.message() else {
            return Err(StructError::from(StatReason::TooFewTokens)
                .with_detail("too few tokens: no message attached"));
        };
        let targets: Vec<&ClassifierRuntime> = match classifier {
            Some(name) => {
                let found: Vec<_> = self
                    .classifiers
                    .iter()
                    .filter(|c| c.name == name)
                    .collect();
                if found.is_empty() {
                    return Err(StructError::from(StatReason::NoClassifier).with_detail(
                        format!("no matching classifier: {name:?} is not configured"),
                    ));
                }
                found
            }
            None => self.classifiers.iter().collect(),
        };
        if targets.is_empty() {
            return Err(StructError::from(StatReason::NoClassifier)
                .with_detail("no matching classifier: none configured"));
        }

        // Learn-cache gate: same class is an ignore, other class becomes a
        // relearn with opposite-class decrements.
        let fingerprint = &message.digest;
        let unlearn = match self.learn_cache.check(fingerprint, is_spam) {
            CacheVerdict::SameClass => {
                return Err(StructError::from(StatReason::AlreadyLearned)
                    .with_detail("ignore request: already learned as this class"));
            }
            CacheVerdict::OtherClass => true,
            CacheVerdict::New => false,
        };

        let mut tokenizers = TokenizerSet::new();
        for cl in targets {
            let runtime = tokenizers.get_or_create(&cl.tokenizer, message, self.strict);
            if (runtime.tokens.len() as u32) < cl.min_tokens {
                return Err(StructError::from(StatReason::TooFewTokens).with_detail(format!(
                    "too few tokens: {} present, classifier {} requires {}",
                    runtime.tokens.len(),
                    cl.name,
                    cl.min_tokens
                )));
            }
            let mut limit = runtime.tokens.len();
            if cl.max_tokens > 0 {
                limit = limit.min(cl.max_tokens as usize);
            }
            for token in runtime.tokens.iter_mut() {
                token.counts = vec![0; cl.statfiles.len()];
            }

            for (slot, sf) in cl.statfiles.iter().enumerate() {
                if sf.spam != is_spam {
                    continue;
                }
                sf.backend
                    .process_tokens(&sf.label, &mut runtime.tokens[..limit], slot)
                    .await?;
                sf.backend
                    .learn_tokens(&sf.label, &runtime.tokens[..limit])
                    .await?;
                sf.backend.inc_learns(&sf.label).await?;
                sf.backend.finalize_learn(&sf.label).await?;
                tracing::info!(
                    classifier = %cl.name,
                    statfile = %sf.label,
                    spam = is_spam,
                    tokens = limit,
                    "learned message"
                );
            }
            if unlearn {
                for sf in cl.statfiles.iter().filter(|sf| sf.spam != is_spam) {
                    sf.backend.dec_learns(&sf.label).await?;
                    sf.backend.finalize_learn(&sf.label).await?;
                }
            }
        }

        self.learn_cache.store(fingerprint, is_spam);
        Ok(())
    }

    /// Active statfiles for a classifier run: the pre-callback may
    /// substitute the list by label.
    fn active_statfiles<'a>(
        &self,
        cl: &'a ClassifierRuntime,
        task: &Task,
    ) -> Vec<&'a StatfileRuntime> {
        if let Some(cb) = self.pre_callbacks.get(&cl.name)
            && let Some(labels) = cb(task)
        {
            return cl
                .statfiles
                .iter()
                .filter(|sf| labels.iter().any(|l| l == &sf.label))
                .collect();
        }
        cl.statfiles.iter().collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
