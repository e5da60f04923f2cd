use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use sg_config::MetricConfig;

use crate::symbols::{ScanSchedule, SymbolDef};

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// Qualitative classification, most severe first. The numeric order is
/// load-bearing: action selection walks from `Reject` down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Action {
    Reject = 0,
    RewriteSubject = 1,
    AddHeader = 2,
    Greylist = 3,
    NoAction = 4,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reject => "reject",
            Self::RewriteSubject => "rewrite subject",
            Self::AddHeader => "add header",
            Self::Greylist => "greylist",
            Self::NoAction => "no action",
        }
    }

    /// Threshold slot in [`MetricSettings::action_limits`]; `NoAction`
    /// has none.
    fn limit_index(&self) -> Option<usize> {
        match self {
            Self::NoAction => None,
            other => Some(*other as usize),
        }
    }

    fn from_limit_index(i: usize) -> Self {
        match i {
            0 => Self::Reject,
            1 => Self::RewriteSubject,
            2 => Self::AddHeader,
            _ => Self::Greylist,
        }
    }
}

impl std::str::FromStr for Action {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "reject" => Ok(Self::Reject),
            "rewrite subject" | "rewrite-subject" => Ok(Self::RewriteSubject),
            "add header" | "add-header" => Ok(Self::AddHeader),
            "greylist" => Ok(Self::Greylist),
            "no action" | "no-action" => Ok(Self::NoAction),
            other => anyhow::bail!("unknown action {other:?}"),
        }
    }
}

// ---------------------------------------------------------------------------
// MetricSettings
// ---------------------------------------------------------------------------

/// Frozen metric parameters derived from [`MetricConfig`] at registry
/// build time.
#[derive(Debug, Clone)]
pub struct MetricSettings {
    pub name: String,
    pub grow_factor: f64,
    /// Thresholds indexed by severity: reject, rewrite-subject,
    /// add-header, greylist. `None` means the action is never picked by
    /// score.
    pub action_limits: [Option<f64>; 4],
    pub subject: String,
}

impl From<&MetricConfig> for MetricSettings {
    fn from(cfg: &MetricConfig) -> Self {
        Self {
            name: cfg.name.clone(),
            grow_factor: cfg.grow_factor,
            action_limits: cfg.actions.limits(),
            subject: cfg.subject.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// SymbolResult
// ---------------------------------------------------------------------------

/// One inserted symbol on a task: its final contribution, deduplicated
/// options and shot count.
#[derive(Debug, Clone)]
pub struct SymbolResult {
    pub name: String,
    pub score: f64,
    pub options: Vec<String>,
    pub nshots: u32,
    pub def: Option<Arc<SymbolDef>>,
}

// ---------------------------------------------------------------------------
// MetricResult
// ---------------------------------------------------------------------------

/// Per-metric accumulation state on one task.
#[derive(Debug)]
pub struct MetricResult {
    pub score: f64,
    grow_factor: f64,
    symbols: HashMap<String, SymbolResult>,
    group_scores: HashMap<String, f64>,
    /// Per-task copy of the metric thresholds; settings may override.
    pub action_limits: [Option<f64>; 4],
    /// Set once a group cap rejection has been logged for a group.
    capped_groups: Vec<String>,
}

impl MetricResult {
    pub fn new(metric: &MetricSettings) -> Self {
        Self {
            score: 0.0,
            grow_factor: 0.0,
            symbols: HashMap::new(),
            group_scores: HashMap::new(),
            action_limits: metric.action_limits,
            capped_groups: Vec::new(),
        }
    }

    pub fn symbols(&self) -> impl Iterator<Item = &SymbolResult> {
        self.symbols.values()
    }

    pub fn symbol(&self, name: &str) -> Option<&SymbolResult> {
        self.symbols.get(name)
    }

    pub fn has_symbol(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    pub fn group_score(&self, group: &str) -> f64 {
        self.group_scores.get(group).copied().unwrap_or(0.0)
    }

    /// Clip a positive weight against the group cap. Returns `None` when
    /// the cap is already reached (the insertion contributes nothing).
    fn check_group_score(
        &mut self,
        symbol: &str,
        group: Option<(&str, f64)>,
        w: f64,
    ) -> Option<f64> {
        let Some((group, max_score)) = group else {
            return Some(w);
        };
        if max_score <= 0.0 || w <= 0.0 {
            return Some(w);
        }
        let current = self.group_score(group);
        if current >= max_score {
            if !self.capped_groups.iter().any(|g| g == group) {
                self.capped_groups.push(group.to_string());
            }
            tracing::info!(
                group,
                max_score,
                symbol,
                weight = w,
                "maximum group score reached, ignoring symbol weight"
            );
            return None;
        }
        if current + w > max_score {
            return Some(max_score - current);
        }
        Some(w)
    }

    /// Insert a fired symbol. Faithful port of the original accumulation
    /// rules: settings score override, shot limits, option dedup forcing
    /// single mode, the significant-replacement diff, grow factor on
    /// positive diffs, and group caps.
    pub fn insert(
        &mut self,
        schedule: &ScanSchedule,
        symbol: &str,
        flag: f64,
        options: &[&str],
        mut single: bool,
        settings: Option<&Value>,
    ) -> &SymbolResult {
        let def = schedule.def_by_name(symbol);
        let mut w = match &def {
            Some(d) => d.weight() * flag,
            None => 0.0,
        };
        let group = def.as_ref().and_then(|d| {
            let name = d.group.as_deref()?;
            Some((name, schedule.group_max_score(name)))
        });

        // Per-task settings may replace the static score outright.
        if let Some(settings) = settings
            && let Some(corr) = settings_score(settings, symbol)
        {
            tracing::debug!(symbol, from = w, to = corr * flag, "settings weight override");
            w = corr * flag;
        }
        // Ignore-score symbols are recorded but never move the metric.
        if def.as_ref().is_some_and(|d| d.flags.ignore_score) {
            w = 0.0;
        }

        let opt = options.first().copied();

        if self.symbols.contains_key(symbol) {
            let max_shots = if single {
                1
            } else {
                match &def {
                    Some(d) if d.max_shots > 0 => d.max_shots,
                    _ => schedule.default_max_shots(),
                }
            };

            let (nshots, has_opt) = {
                let s = &self.symbols[symbol];
                (s.nshots, opt.is_some_and(|o| s.options.iter().any(|x| x == o)))
            };
            if !single && max_shots > 0 && nshots >= max_shots {
                single = true;
            }
            if has_opt {
                single = true;
            } else {
                let one_param = def.as_ref().is_some_and(|d| d.flags.one_param);
                let max_opts = schedule.default_max_shots() as usize;
                let s = self.symbols.get_mut(symbol).expect("symbol present");
                if !single {
                    // A counted shot; single-mode replacements keep the
                    // shot count where it is.
                    s.nshots += 1;
                }
                if let Some(o) = opt {
                    push_option(s, o, one_param, max_opts);
                }
            }

            let prev_score = self.symbols[symbol].score;
            let mut diff = if !single {
                w
            } else if w.abs() > prev_score.abs() && w.is_sign_positive() == prev_score.is_sign_positive()
            {
                // Replace a less significant weight with a more significant
                // one of the same sign.
                w - prev_score
            } else {
                0.0
            };

            if diff != 0.0 {
                let next_gf = if self.grow_factor != 0.0 && diff > 0.0 {
                    diff *= self.grow_factor;
                    self.grow_factor * schedule.metric().grow_factor
                } else if diff > 0.0 {
                    schedule.metric().grow_factor
                } else {
                    self.grow_factor
                };

                if let Some(diff) = self.check_group_score(symbol, group, diff) {
                    self.score += diff;
                    self.grow_factor = next_gf;
                    if let Some((g, _)) = group {
                        *self.group_scores.entry(g.to_string()).or_insert(0.0) += diff;
                    }
                    let s = self.symbols.get_mut(symbol).expect("symbol present");
                    if single {
                        s.score = w;
                    } else {
                        s.score += diff;
                    }
                }
            }
        } else {
            let next_gf = if self.grow_factor != 0.0 && w > 0.0 {
                w *= self.grow_factor;
                self.grow_factor * schedule.metric().grow_factor
            } else if w > 0.0 {
                schedule.metric().grow_factor
            } else {
                self.grow_factor
            };

            let score = match self.check_group_score(symbol, group, w) {
                Some(w) => {
                    self.score += w;
                    self.grow_factor = next_gf;
                    if let Some((g, _)) = group {
                        *self.group_scores.entry(g.to_string()).or_insert(0.0) += w;
                    }
                    w
                }
                None => 0.0,
            };

            let mut s = SymbolResult {
                name: symbol.to_string(),
                score,
                options: Vec::new(),
                nshots: 1,
                def: def.clone(),
            };
            if let Some(o) = opt {
                let one_param = def.as_ref().is_some_and(|d| d.flags.one_param);
                push_option(&mut s, o, one_param, schedule.default_max_shots() as usize);
            }
            self.symbols.insert(symbol.to_string(), s);
        }

        // Extra options beyond the first join the same result.
        for o in options.iter().skip(1) {
            self.add_option(schedule, symbol, o);
        }

        let s = &self.symbols[symbol];
        tracing::debug!(symbol, score = s.score, metric = %schedule.metric().name, "symbol inserted");
        s
    }

    /// Append a deduplicated option to an existing symbol result.
    pub fn add_option(&mut self, schedule: &ScanSchedule, symbol: &str, option: &str) -> bool {
        let max_opts = schedule.default_max_shots() as usize;
        let Some(s) = self.symbols.get_mut(symbol) else {
            return false;
        };
        let one_param = s.def.as_ref().is_some_and(|d| d.flags.one_param);
        push_option(s, option, one_param, max_opts)
    }

    /// Pick the action for the accumulated score, optionally forced by a
    /// prefilter pre-result.
    pub fn check_action(&mut self, pre_result: Option<Action>) -> Action {
        match pre_result {
            None => {
                let mut selected = Action::NoAction;
                let mut max_threshold = 0.0f64;
                for i in 0..self.action_limits.len() {
                    let Some(threshold) = self.action_limits[i] else {
                        continue;
                    };
                    if self.score >= threshold && threshold > max_threshold {
                        selected = Action::from_limit_index(i);
                        max_threshold = threshold;
                    }
                }
                selected
            }
            Some(pre) => {
                let Some(start) = pre.limit_index() else {
                    // Pre-result says no-action: nothing to force.
                    return Action::NoAction;
                };
                // The first level at or beyond the forced one with a defined
                // threshold wins; with none defined the forced level stands
                // with a zeroed score.
                let mut selected = pre;
                let mut threshold = None;
                for i in start..self.action_limits.len() {
                    if let Some(t) = self.action_limits[i] {
                        selected = Action::from_limit_index(i);
                        threshold = Some(t);
                        break;
                    }
                }
                self.score = threshold.unwrap_or(0.0);
                selected
            }
        }
    }
}

fn push_option(s: &mut SymbolResult, option: &str, one_param: bool, max_opts: usize) -> bool {
    if one_param && !s.options.is_empty() {
        return false;
    }
    if s.options.len() >= max_opts {
        return false;
    }
    if s.options.iter().any(|o| o == option) {
        return false;
    }
    s.options.push(option.to_string());
    true
}

/// Settings score override: `symbols.<name>` or a bare `<name>` key.
fn settings_score(settings: &Value, symbol: &str) -> Option<f64> {
    sg_config::settings::lookup_path(settings, &format!("symbols.{symbol}"))
        .or_else(|| settings.get(symbol))
        .and_then(Value::as_f64)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
