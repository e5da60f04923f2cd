use std::collections::HashMap;
use std::sync::Arc;

use orion_error::StructError;

use sg_config::ScanConfig;

use crate::error::{CoreReason, CoreResult};
use crate::metric::MetricSettings;

use super::composites::CompositeExpr;
use super::stats::SymbolStats;
use super::{Condition, SymbolDef, SymbolFlags, SymbolHandler, SymbolId, SymbolType};

// ---------------------------------------------------------------------------
// SymbolCache — mutable registration phase
// ---------------------------------------------------------------------------

struct PendingDef {
    name: String,
    ty: SymbolType,
    priority: i32,
    weight: f64,
    parent: Option<SymbolId>,
    group: Option<String>,
    flags: SymbolFlags,
    max_shots: u32,
    dep_names: Vec<String>,
    condition: Option<Arc<dyn Condition>>,
    handler: Option<Arc<dyn SymbolHandler>>,
}

/// Registration-time symbol cache. Workers and built-in rules register
/// here during bootstrap; [`SymbolCache::post_load`] freezes everything
/// into a [`ScanSchedule`].
pub struct SymbolCache {
    defs: Vec<PendingDef>,
    by_name: HashMap<String, SymbolId>,
    delayed_deps: Vec<(String, String)>,
    composites: Vec<(SymbolId, String)>,
    groups: HashMap<String, f64>,
    metric: MetricSettings,
    default_max_shots: u32,
}

impl SymbolCache {
    pub fn new(metric: MetricSettings, default_max_shots: u32) -> Self {
        Self {
            defs: Vec::new(),
            by_name: HashMap::new(),
            delayed_deps: Vec::new(),
            composites: Vec::new(),
            groups: HashMap::new(),
            metric,
            default_max_shots,
        }
    }

    /// Seed the cache from the `[scan]` config section: groups, statically
    /// scored symbols, and composites.
    pub fn from_config(scan: &ScanConfig, default_max_shots: u32) -> CoreResult<Self> {
        let mut cache = Self::new(MetricSettings::from(&scan.metric), default_max_shots);
        for (name, group) in &scan.groups {
            cache.groups.insert(name.clone(), group.max_score);
        }
        for (name, sym) in &scan.symbols {
            let id = cache.add_symbol_optional(name, 0, SymbolType::Normal, None);
            let def = &mut cache.defs[id];
            def.weight = sym.score;
            def.group = sym.group.clone();
            def.flags.one_shot = sym.one_shot;
            def.max_shots = if sym.one_shot { 1 } else { sym.max_shots };
        }
        for (name, composite) in &scan.composites {
            cache.register_composite(
                name,
                &composite.expression,
                composite.score.unwrap_or(0.0),
                composite.group.as_deref(),
            )?;
        }
        Ok(cache)
    }

    /// Register a symbol. Duplicate names are rejected; use
    /// [`SymbolCache::add_symbol_optional`] when re-registration should
    /// return the existing id instead.
    pub fn add_symbol(
        &mut self,
        name: &str,
        priority: i32,
        ty: SymbolType,
        handler: Option<Arc<dyn SymbolHandler>>,
    ) -> CoreResult<SymbolId> {
        if self.by_name.contains_key(name) {
            return Err(StructError::from(CoreReason::Registration)
                .with_detail(format!("symbol {name} is already registered")));
        }
        Ok(self.insert_def(name, priority, ty, handler))
    }

    /// Register a symbol, or return the existing id for the name. An
    /// existing def gains the handler if it had none (config-declared
    /// symbols get their callback attached this way).
    pub fn add_symbol_optional(
        &mut self,
        name: &str,
        priority: i32,
        ty: SymbolType,
        handler: Option<Arc<dyn SymbolHandler>>,
    ) -> SymbolId {
        if let Some(&id) = self.by_name.get(name) {
            let def = &mut self.defs[id];
            if def.handler.is_none()
                && let Some(h) = handler
            {
                def.handler = Some(h);
                def.ty = ty;
                def.priority = priority;
            }
            return id;
        }
        self.insert_def(name, priority, ty, handler)
    }

    fn insert_def(
        &mut self,
        name: &str,
        priority: i32,
        ty: SymbolType,
        handler: Option<Arc<dyn SymbolHandler>>,
    ) -> SymbolId {
        let id = self.defs.len();
        self.defs.push(PendingDef {
            name: name.to_string(),
            ty,
            priority,
            weight: 0.0,
            parent: None,
            group: None,
            flags: SymbolFlags::default(),
            max_shots: 0,
            dep_names: Vec::new(),
            condition: None,
            handler,
        });
        self.by_name.insert(name.to_string(), id);
        id
    }

    /// Register a virtual symbol attached to a callback parent.
    pub fn add_virtual(&mut self, name: &str, parent: SymbolId) -> CoreResult<SymbolId> {
        if parent >= self.defs.len() {
            return Err(StructError::from(CoreReason::Registration)
                .with_detail(format!("virtual symbol {name} has unknown parent {parent}")));
        }
        let id = self.add_symbol(name, 0, SymbolType::Virtual, None)?;
        self.defs[id].parent = Some(parent);
        Ok(id)
    }

    /// Declare that `src` must run after `dep`. `src` must exist already;
    /// `dep` may be registered later (resolution happens at post-load).
    pub fn add_dependency(&mut self, src: &str, dep: &str) -> CoreResult<()> {
        let Some(&id) = self.by_name.get(src) else {
            return Err(StructError::from(CoreReason::Registration)
                .with_detail(format!("dependency source {src} is not registered")));
        };
        self.defs[id].dep_names.push(dep.to_string());
        Ok(())
    }

    /// Like [`SymbolCache::add_dependency`] but `src` may also be
    /// registered later.
    pub fn add_delayed_dependency(&mut self, src: &str, dep: &str) {
        self.delayed_deps.push((src.to_string(), dep.to_string()));
    }

    /// Attach an enable condition to a symbol.
    pub fn add_condition(&mut self, id: SymbolId, condition: Arc<dyn Condition>) -> CoreResult<()> {
        let def = self.defs.get_mut(id).ok_or_else(|| {
            StructError::from(CoreReason::Registration)
                .with_detail(format!("condition for unknown symbol id {id}"))
        })?;
        def.condition = Some(condition);
        Ok(())
    }

    /// Mutate flags of a registered symbol.
    pub fn set_flags(&mut self, id: SymbolId, flags: SymbolFlags) {
        if let Some(def) = self.defs.get_mut(id) {
            def.flags = flags;
        }
    }

    /// Set the static score and optional group of a registered symbol.
    pub fn set_score(&mut self, id: SymbolId, weight: f64, group: Option<&str>) {
        if let Some(def) = self.defs.get_mut(id) {
            def.weight = weight;
            def.group = group.map(str::to_string);
        }
    }

    /// Define (or redefine) a symbols group cap.
    pub fn set_group(&mut self, name: &str, max_score: f64) {
        self.groups.insert(name.to_string(), max_score);
    }

    /// Register a composite symbol with its boolean expression.
    pub fn register_composite(
        &mut self,
        name: &str,
        expression: &str,
        score: f64,
        group: Option<&str>,
    ) -> CoreResult<SymbolId> {
        // Parse now so a bad expression is a (fatal) config error.
        CompositeExpr::parse(expression)?;
        let id = self.add_symbol(name, 0, SymbolType::Composite, None)?;
        self.defs[id].weight = score;
        self.defs[id].group = group.map(str::to_string);
        self.composites.push((id, expression.to_string()));
        Ok(id)
    }

    pub fn lookup(&self, name: &str) -> Option<SymbolId> {
        self.by_name.get(name).copied()
    }

    /// Freeze the registration into an executable schedule: resolve
    /// delayed dependencies, reject cycles, compute `(priority, rank)`
    /// order keys and partition by type.
    pub fn post_load(mut self) -> CoreResult<Arc<ScanSchedule>> {
        // 1. Delayed dependencies become ordinary ones where both ends
        //    exist; missing names are dropped with a warning.
        for (src, dep) in std::mem::take(&mut self.delayed_deps) {
            match self.by_name.get(&src) {
                Some(&id) => self.defs[id].dep_names.push(dep),
                None => {
                    tracing::warn!(src, dep, "dropping delayed dependency: source unknown");
                }
            }
        }

        let name_of = |defs: &Vec<PendingDef>, id: SymbolId| defs[id].name.clone();
        let mut resolved_deps: Vec<Vec<SymbolId>> = Vec::with_capacity(self.defs.len());
        for def in &self.defs {
            let mut deps = Vec::new();
            for dep in &def.dep_names {
                match self.by_name.get(dep) {
                    Some(&dep_id) => deps.push(dep_id),
                    None => {
                        tracing::warn!(
                            symbol = %def.name,
                            dep = %dep,
                            "dropping dependency on unknown symbol"
                        );
                    }
                }
            }
            deps.sort_unstable();
            deps.dedup();
            resolved_deps.push(deps);
        }

        // 2 + 3. Cycle rejection and longest-chain rank in one DFS.
        let mut rank = vec![0u32; self.defs.len()];
        let mut state = vec![VisitState::Unvisited; self.defs.len()];
        for id in 0..self.defs.len() {
            visit(id, &resolved_deps, &mut rank, &mut state).map_err(|cycle_id| {
                StructError::from(CoreReason::DependencyCycle).with_detail(format!(
                    "cyclic dependency through symbol {}",
                    name_of(&self.defs, cycle_id)
                ))
            })?;
        }

        // 4. Build frozen defs and partitions.
        let mut defs: Vec<Arc<SymbolDef>> = Vec::with_capacity(self.defs.len());
        for (id, pending) in self.defs.into_iter().enumerate() {
            defs.push(Arc::new(SymbolDef {
                id,
                name: pending.name,
                ty: pending.ty,
                priority: pending.priority,
                rank: rank[id],
                weight_bits: SymbolDef::new_weight_bits(pending.weight),
                parent: pending.parent,
                group: pending.group,
                flags: pending.flags,
                max_shots: pending.max_shots,
                deps: std::mem::take(&mut resolved_deps[id]),
                condition: pending.condition,
                handler: pending.handler,
            }));
        }

        let order_key = |id: &SymbolId| {
            let d = &defs[*id];
            (-(d.priority as i64), d.rank, d.id)
        };
        let mut prefilters = Vec::new();
        let mut filters = Vec::new();
        let mut postfilters = Vec::new();
        for def in &defs {
            match def.ty {
                SymbolType::Prefilter => prefilters.push(def.id),
                SymbolType::Postfilter => postfilters.push(def.id),
                SymbolType::Normal
                | SymbolType::Callback
                | SymbolType::Virtual
                | SymbolType::Ghost => filters.push(def.id),
                SymbolType::Composite => {}
            }
        }
        prefilters.sort_by_key(order_key);
        filters.sort_by_key(order_key);
        postfilters.sort_by_key(order_key);

        let mut composites = Vec::with_capacity(self.composites.len());
        for (id, expression) in &self.composites {
            composites.push((*id, CompositeExpr::parse(expression)?));
        }

        let stats = SymbolStats::new(defs.len());

        Ok(Arc::new(ScanSchedule {
            by_name: defs
                .iter()
                .map(|d| (d.name.clone(), d.id))
                .collect(),
            defs,
            prefilters,
            filters,
            composites,
            postfilters,
            groups: self.groups,
            metric: self.metric,
            action_overrides: std::sync::Mutex::new([None; 4]),
            default_max_shots: self.default_max_shots,
            stats,
        }))
    }
}

#[derive(Clone, Copy, PartialEq)]
enum VisitState {
    Unvisited,
    InProgress,
    Done,
}

/// DFS computing the longest dependency chain; `Err(id)` reports a node on
/// a cycle.
fn visit(
    id: SymbolId,
    deps: &[Vec<SymbolId>],
    rank: &mut [u32],
    state: &mut [VisitState],
) -> Result<u32, SymbolId> {
    match state[id] {
        VisitState::Done => return Ok(rank[id]),
        VisitState::InProgress => return Err(id),
        VisitState::Unvisited => {}
    }
    state[id] = VisitState::InProgress;
    let mut longest = 0;
    for &dep in &deps[id] {
        longest = longest.max(visit(dep, deps, rank, state)? + 1);
    }
    rank[id] = longest;
    state[id] = VisitState::Done;
    Ok(longest)
}

// ---------------------------------------------------------------------------
// ScanSchedule — frozen, shared by every task
// ---------------------------------------------------------------------------

/// The frozen symbol schedule: id-indexed definitions, phase partitions in
/// `(priority, rank)` order, group caps and metric parameters. Symbol
/// weights and action thresholds stay runtime-mutable for the controller
/// commands; everything else is immutable after post-load.
#[derive(Debug)]
pub struct ScanSchedule {
    pub(crate) defs: Vec<Arc<SymbolDef>>,
    by_name: HashMap<String, SymbolId>,
    pub(crate) prefilters: Vec<SymbolId>,
    pub(crate) filters: Vec<SymbolId>,
    pub(crate) composites: Vec<(SymbolId, CompositeExpr)>,
    pub(crate) postfilters: Vec<SymbolId>,
    groups: HashMap<String, f64>,
    metric: MetricSettings,
    action_overrides: std::sync::Mutex<[Option<f64>; 4]>,
    default_max_shots: u32,
    pub stats: SymbolStats,
}

impl ScanSchedule {
    pub fn def(&self, id: SymbolId) -> &Arc<SymbolDef> {
        &self.defs[id]
    }

    pub fn def_by_name(&self, name: &str) -> Option<Arc<SymbolDef>> {
        self.by_name.get(name).map(|&id| Arc::clone(&self.defs[id]))
    }

    pub fn lookup(&self, name: &str) -> Option<SymbolId> {
        self.by_name.get(name).copied()
    }

    pub fn symbol_count(&self) -> usize {
        self.defs.len()
    }

    pub fn metric(&self) -> &MetricSettings {
        &self.metric
    }

    pub fn group_max_score(&self, group: &str) -> f64 {
        self.groups.get(group).copied().unwrap_or(0.0)
    }

    /// Effective thresholds: config values with runtime overrides applied.
    pub fn action_limits(&self) -> [Option<f64>; 4] {
        let overrides = self.action_overrides.lock().expect("overrides poisoned");
        let mut limits = self.metric.action_limits;
        for (limit, ovr) in limits.iter_mut().zip(overrides.iter()) {
            if ovr.is_some() {
                *limit = *ovr;
            }
        }
        limits
    }

    /// Override one action threshold at runtime (`ADD_ACTION`). Severity
    /// index: 0 reject, 1 rewrite-subject, 2 add-header, 3 greylist.
    pub fn set_action_limit(&self, severity: usize, score: f64) -> bool {
        let mut overrides = self.action_overrides.lock().expect("overrides poisoned");
        match overrides.get_mut(severity) {
            Some(slot) => {
                *slot = Some(score);
                true
            }
            None => false,
        }
    }

    pub fn default_max_shots(&self) -> u32 {
        self.default_max_shots
    }

    pub fn symbol_names(&self) -> impl Iterator<Item = &str> {
        self.defs.iter().map(|d| d.name.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
