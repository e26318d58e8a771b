use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::alpha::{AlphaIndex, AlphaStats, ConstraintSet, normalize_constraints};
use crate::builtins::{Expr, RegexCache, collect_vars, eval_test};
use crate::fact::{Fact, Signature, split_list};
use crate::rules::{
    Pattern, RuleAction, RuleDef, chain_rule, has_key_rule, intersection_rule, owl_rules,
};
use crate::source::SourceRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WmeId(u32);

impl WmeId {
    fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenId(u32);

impl TokenId {
    fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

/// All network node kinds live in one arena as a tagged sum; references
/// between nodes are arena indices, so the cyclic alpha/beta/token graph
/// never needs shared ownership.
#[derive(Debug)]
enum NodeKind {
    Alpha(AlphaMemoryNode),
    Beta(BetaMemoryNode),
    Join(JoinNode),
    Production(ProductionNode),
}

/// Constraint-set identity lives in the AlphaIndex; the node itself only
/// holds contents and successors.
#[derive(Debug, Default)]
struct AlphaMemoryNode {
    wmes: Vec<WmeId>,
    wme_set: HashSet<WmeId>,
    /// Join nodes fed on their right input.
    successors: Vec<NodeId>,
}

#[derive(Debug, Default)]
struct BetaMemoryNode {
    tokens: Vec<TokenId>,
    dedup: HashMap<(TokenId, WmeId), TokenId>,
    /// Join nodes fed on their left input, plus production nodes.
    successors: Vec<NodeId>,
}

#[derive(Debug)]
struct JoinNode {
    left: NodeId,
    right: NodeId,
    pattern: Pattern,
    /// Variables shared with the left context, sorted; the hash-index key.
    join_vars: Vec<String>,
    filters: Vec<Expr>,
    out: NodeId,
    left_index: HashMap<Vec<String>, Vec<TokenId>>,
    right_index: HashMap<Vec<String>, Vec<WmeId>>,
}

#[derive(Debug)]
struct ProductionNode {
    name: String,
    action: RuleAction,
    left: NodeId,
    refraction: HashSet<TokenId>,
    firings: u64,
}

#[derive(Debug)]
struct WmeEntry {
    fact: Fact,
    signature: Signature,
    /// Firing tokens justifying this WME when it was inferred.
    support: HashSet<TokenId>,
    alpha_memberships: Vec<NodeId>,
    /// Tokens whose right-side component is this WME.
    dependent_tokens: Vec<TokenId>,
    live: bool,
}

#[derive(Debug)]
struct TokenEntry {
    parent: Option<TokenId>,
    wme: Option<WmeId>,
    owner: NodeId,
    bindings: HashMap<String, String>,
    children: Vec<TokenId>,
    /// Inferred WMEs this token supports.
    justified: Vec<WmeId>,
    live: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkStats {
    pub wme_count: usize,
    pub token_count: usize,
    pub alpha_memory_count: usize,
    pub production_firings: BTreeMap<String, u64>,
    pub alpha: AlphaStats,
    pub join_left_activations: u64,
    pub join_right_activations: u64,
    pub join_matches: u64,
    pub indexed_join_activations: u64,
    pub cartesian_join_activations: u64,
}

/// The discrimination network: working memory, alpha/beta graph,
/// productions and the per-source registry. One externally serialized
/// operation (assert, retract, rule install) runs to fixpoint before the
/// next begins; queries read but never mutate.
#[derive(Debug)]
pub struct ReteNetwork {
    nodes: Vec<NodeKind>,
    wmes: Vec<WmeEntry>,
    wme_by_sig: HashMap<Signature, WmeId>,
    tokens: Vec<TokenEntry>,
    alpha_index: AlphaIndex,
    registry: SourceRegistry,
    productions_by_name: HashMap<String, NodeId>,
    root_beta: NodeId,
    agenda: VecDeque<(NodeId, TokenId)>,
    regex_cache: RegexCache,
    user_rules: Vec<RuleDef>,
    installed: Vec<RuleDef>,
    join_left_activations: u64,
    join_right_activations: u64,
    join_matches: u64,
    indexed_join_activations: u64,
    cartesian_join_activations: u64,
}

impl Default for ReteNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl ReteNetwork {
    /// A network primed with the built-in OWL 2 RL rule set.
    pub fn new() -> Self {
        let mut net = Self::bare();
        for rule in owl_rules() {
            net.install_production(rule, false);
        }
        net.run_agenda();
        net
    }

    /// An empty network with no productions. Useful for exercising the
    /// match machinery in isolation.
    pub fn bare() -> Self {
        let root_beta = NodeId::from_index(0);
        let mut net = Self {
            nodes: vec![NodeKind::Beta(BetaMemoryNode::default())],
            wmes: Vec::new(),
            wme_by_sig: HashMap::new(),
            tokens: Vec::new(),
            alpha_index: AlphaIndex::new(),
            registry: SourceRegistry::new(),
            productions_by_name: HashMap::new(),
            root_beta,
            agenda: VecDeque::new(),
            regex_cache: RegexCache::new(),
            user_rules: Vec::new(),
            installed: Vec::new(),
            join_left_activations: 0,
            join_right_activations: 0,
            join_matches: 0,
            indexed_join_activations: 0,
            cartesian_join_activations: 0,
        };
        let dummy = net.new_token(None, None, root_beta, HashMap::new());
        net.beta_mut(root_beta).tokens.push(dummy);
        net
    }

    /// Assert a fact under a named source and run inference to fixpoint.
    /// Re-asserting the same fact under the same source is a no-op.
    pub fn add_fact(&mut self, fact: Fact, source: &str) -> Signature {
        let signature = fact.signature();
        self.registry.record(signature, source);
        self.insert_wme(fact, None);
        self.run_agenda();
        signature
    }

    /// Install a user rule and evaluate it against existing facts.
    pub fn add_rule(&mut self, rule: RuleDef) {
        if self.productions_by_name.contains_key(&rule.name) {
            return;
        }
        self.user_rules.push(rule.clone());
        self.install_production(rule, false);
        self.run_agenda();
    }

    /// Retract every fact introduced solely by `source`, cascading through
    /// tokens and inferred facts. Unknown sources are a silent no-op.
    pub fn remove_source(&mut self, source: &str) {
        let orphaned = self.registry.drop_source(source);
        if orphaned.is_empty() {
            return;
        }
        for signature in orphaned {
            if let Some(&wid) = self.wme_by_sig.get(&signature) {
                if self.wmes[wid.index()].support.is_empty() {
                    self.retract_wme(wid);
                }
            }
        }
        self.sweep_ungrounded();
    }

    pub fn sources(&self) -> Vec<String> {
        self.registry.sources()
    }

    pub fn facts_of_source(&self, source: &str) -> Vec<Signature> {
        self.registry.facts_of(source)
    }

    pub fn sources_of_fact(&self, signature: Signature) -> Vec<String> {
        self.registry.sources_of(signature)
    }

    pub fn contains(&self, fact: &Fact) -> bool {
        self.wme_by_sig.contains_key(&fact.signature())
    }

    pub fn fact_count(&self) -> usize {
        self.wme_by_sig.len()
    }

    pub fn all_facts(&self) -> Vec<&Fact> {
        self.wmes
            .iter()
            .filter(|w| w.live)
            .map(|w| &w.fact)
            .collect()
    }

    /// Direct introspection: every live fact satisfying the constraints.
    /// Served from an alpha memory when one exists for the exact key, by a
    /// working-memory scan otherwise; queries never mutate the network.
    pub fn query_facts(&self, constraints: &[(String, String)]) -> Vec<&Fact> {
        let normalized = normalize_constraints(constraints.to_vec());
        if let Some(node) = self.alpha_index.lookup(&normalized) {
            let NodeKind::Alpha(alpha) = &self.nodes[node.index()] else {
                return Vec::new();
            };
            return alpha
                .wmes
                .iter()
                .filter(|w| self.wmes[w.index()].live)
                .map(|w| &self.wmes[w.index()].fact)
                .collect();
        }
        self.wmes
            .iter()
            .filter(|w| w.live && w.fact.satisfies(&normalized))
            .map(|w| &w.fact)
            .collect()
    }

    pub fn user_rules(&self) -> &[RuleDef] {
        &self.user_rules
    }

    pub fn installed_rules(&self) -> &[RuleDef] {
        &self.installed
    }

    /// Reinstall a template-instantiated production, e.g. while restoring
    /// a snapshot. Idempotent by production name.
    pub fn install_specialized(&mut self, rule: RuleDef) {
        self.install_production(rule, true);
        self.run_agenda();
    }

    /// Facts asserted by at least one source, with their source sets.
    /// Inferred facts are excluded; they re-derive from these.
    pub fn asserted_facts(&self) -> Vec<(Fact, Vec<String>)> {
        let mut out: Vec<(Fact, Vec<String>)> = self
            .wmes
            .iter()
            .filter(|w| w.live && self.registry.is_asserted(w.signature))
            .map(|w| (w.fact.clone(), self.registry.sources_of(w.signature)))
            .collect();
        out.sort_by(|a, b| a.0.signature().cmp(&b.0.signature()));
        out
    }

    pub fn stats(&self) -> NetworkStats {
        let mut production_firings = BTreeMap::new();
        let mut alpha_memory_count = 0usize;
        for node in &self.nodes {
            match node {
                NodeKind::Production(p) => {
                    production_firings.insert(p.name.clone(), p.firings);
                }
                NodeKind::Alpha(_) => alpha_memory_count += 1,
                _ => {}
            }
        }
        NetworkStats {
            wme_count: self.wme_by_sig.len(),
            token_count: self
                .tokens
                .iter()
                .skip(1)
                .filter(|t| t.live)
                .count(),
            alpha_memory_count,
            production_firings,
            alpha: self.alpha_index.stats,
            join_left_activations: self.join_left_activations,
            join_right_activations: self.join_right_activations,
            join_matches: self.join_matches,
            indexed_join_activations: self.indexed_join_activations,
            cartesian_join_activations: self.cartesian_join_activations,
        }
    }

    // ---- node accessors ----------------------------------------------

    fn alpha_mut(&mut self, id: NodeId) -> &mut AlphaMemoryNode {
        match &mut self.nodes[id.index()] {
            NodeKind::Alpha(a) => a,
            _ => unreachable!("node is not an alpha memory"),
        }
    }

    fn beta(&self, id: NodeId) -> &BetaMemoryNode {
        match &self.nodes[id.index()] {
            NodeKind::Beta(b) => b,
            _ => unreachable!("node is not a beta memory"),
        }
    }

    fn beta_mut(&mut self, id: NodeId) -> &mut BetaMemoryNode {
        match &mut self.nodes[id.index()] {
            NodeKind::Beta(b) => b,
            _ => unreachable!("node is not a beta memory"),
        }
    }

    fn join(&self, id: NodeId) -> &JoinNode {
        match &self.nodes[id.index()] {
            NodeKind::Join(j) => j,
            _ => unreachable!("node is not a join"),
        }
    }

    fn join_mut(&mut self, id: NodeId) -> &mut JoinNode {
        match &mut self.nodes[id.index()] {
            NodeKind::Join(j) => j,
            _ => unreachable!("node is not a join"),
        }
    }

    // ---- working memory ----------------------------------------------

    fn new_token(
        &mut self,
        parent: Option<TokenId>,
        wme: Option<WmeId>,
        owner: NodeId,
        bindings: HashMap<String, String>,
    ) -> TokenId {
        let tid = TokenId::from_index(self.tokens.len());
        self.tokens.push(TokenEntry {
            parent,
            wme,
            owner,
            bindings,
            children: Vec::new(),
            justified: Vec::new(),
            live: true,
        });
        tid
    }

    fn insert_wme(&mut self, fact: Fact, support: Option<TokenId>) -> WmeId {
        let signature = fact.signature();
        if let Some(&wid) = self.wme_by_sig.get(&signature) {
            if let Some(tid) = support {
                if self.wmes[wid.index()].support.insert(tid) {
                    self.tokens[tid.index()].justified.push(wid);
                }
            }
            return wid;
        }

        let wid = WmeId::from_index(self.wmes.len());
        let mut entry = WmeEntry {
            fact,
            signature,
            support: HashSet::new(),
            alpha_memberships: Vec::new(),
            dependent_tokens: Vec::new(),
            live: true,
        };
        if let Some(tid) = support {
            entry.support.insert(tid);
        }
        self.wmes.push(entry);
        self.wme_by_sig.insert(signature, wid);
        if let Some(tid) = support {
            self.tokens[tid.index()].justified.push(wid);
        }

        let memories = self.alpha_index.matching(&self.wmes[wid.index()].fact);
        for memory in memories {
            self.alpha_activate(memory, wid);
        }
        wid
    }

    fn alpha_activate(&mut self, memory: NodeId, wid: WmeId) {
        let successors = {
            let alpha = self.alpha_mut(memory);
            if !alpha.wme_set.insert(wid) {
                return;
            }
            alpha.wmes.push(wid);
            alpha.successors.clone()
        };
        self.wmes[wid.index()].alpha_memberships.push(memory);
        for join_id in successors {
            self.join_right_activation(join_id, wid);
        }
    }

    fn join_key_from_wme(&self, join_id: NodeId, wid: WmeId) -> Option<(Vec<String>, Vec<(String, String)>)> {
        let join = self.join(join_id);
        let fact = &self.wmes[wid.index()].fact;
        let binds = join.pattern.bindings(fact)?;
        let mut key = Vec::with_capacity(join.join_vars.len());
        for var in &join.join_vars {
            let (_, value) = binds.iter().find(|(name, _)| name == var)?;
            key.push(value.clone());
        }
        Some((key, binds))
    }

    fn join_right_activation(&mut self, join_id: NodeId, wid: WmeId) {
        self.join_right_activations += 1;
        let Some((key, binds)) = self.join_key_from_wme(join_id, wid) else {
            return;
        };
        if self.join(join_id).join_vars.is_empty() {
            self.cartesian_join_activations += 1;
        } else {
            self.indexed_join_activations += 1;
        }
        let join = self.join_mut(join_id);
        join.right_index.entry(key.clone()).or_default().push(wid);
        let candidates = join.left_index.get(&key).cloned().unwrap_or_default();
        for tid in candidates {
            if self.tokens[tid.index()].live {
                self.try_join(join_id, tid, wid, &binds);
            }
        }
    }

    fn join_left_activation(&mut self, join_id: NodeId, tid: TokenId) {
        self.join_left_activations += 1;
        let join = self.join(join_id);
        let mut key = Vec::with_capacity(join.join_vars.len());
        for var in &join.join_vars {
            let Some(value) = self.tokens[tid.index()].bindings.get(var) else {
                return;
            };
            key.push(value.clone());
        }
        if self.join(join_id).join_vars.is_empty() {
            self.cartesian_join_activations += 1;
        } else {
            self.indexed_join_activations += 1;
        }
        let join = self.join_mut(join_id);
        join.left_index.entry(key.clone()).or_default().push(tid);
        let candidates = join.right_index.get(&key).cloned().unwrap_or_default();
        for wid in candidates {
            if !self.wmes[wid.index()].live {
                continue;
            }
            let Some((_, binds)) = self.join_key_from_wme(join_id, wid) else {
                continue;
            };
            self.try_join(join_id, tid, wid, &binds);
        }
    }

    fn try_join(&mut self, join_id: NodeId, tid: TokenId, wid: WmeId, binds: &[(String, String)]) {
        let mut merged = self.tokens[tid.index()].bindings.clone();
        for (name, value) in binds {
            match merged.get(name) {
                Some(existing) if existing != value => return,
                Some(_) => {}
                None => {
                    merged.insert(name.clone(), value.clone());
                }
            }
        }
        let (out, filters) = {
            let join = self.join(join_id);
            (join.out, join.filters.clone())
        };
        for filter in &filters {
            if !eval_test(filter, &merged, &mut self.regex_cache) {
                return;
            }
        }
        self.join_matches += 1;
        self.beta_add_token(out, tid, wid, merged);
    }

    fn beta_add_token(
        &mut self,
        beta_id: NodeId,
        parent: TokenId,
        wid: WmeId,
        bindings: HashMap<String, String>,
    ) {
        // Two alias paths can produce the same (parent, wme) pair; without
        // this dedup dense symmetric+transitive inputs never terminate.
        if self.beta(beta_id).dedup.contains_key(&(parent, wid)) {
            return;
        }
        let tid = self.new_token(Some(parent), Some(wid), beta_id, bindings);
        self.tokens[parent.index()].children.push(tid);
        self.wmes[wid.index()].dependent_tokens.push(tid);
        let successors = {
            let beta = self.beta_mut(beta_id);
            beta.dedup.insert((parent, wid), tid);
            beta.tokens.push(tid);
            beta.successors.clone()
        };
        for succ in successors {
            match &self.nodes[succ.index()] {
                NodeKind::Join(_) => self.join_left_activation(succ, tid),
                NodeKind::Production(_) => self.agenda.push_back((succ, tid)),
                _ => {}
            }
        }
    }

    // ---- firing ------------------------------------------------------

    fn run_agenda(&mut self) {
        while let Some((prod_id, tid)) = self.agenda.pop_front() {
            if !self.tokens[tid.index()].live {
                continue;
            }
            let action = {
                let NodeKind::Production(prod) = &mut self.nodes[prod_id.index()] else {
                    continue;
                };
                if !prod.refraction.insert(tid) {
                    continue;
                }
                prod.firings += 1;
                prod.action.clone()
            };
            let bindings = self.tokens[tid.index()].bindings.clone();
            match action {
                RuleAction::Assert(templates) => {
                    for template in &templates {
                        if let Some(fact) =
                            template.instantiate(&|var| bindings.get(var).cloned())
                        {
                            self.insert_wme(fact, Some(tid));
                        }
                    }
                }
                RuleAction::InstallChain => {
                    let chain = bindings.get("?chain").map(|c| split_list(c));
                    let sup = bindings.get("?super");
                    if let (Some(chain), Some(sup)) = (chain, sup) {
                        if let Some(rule) = chain_rule(&chain, sup) {
                            self.install_production(rule, true);
                        }
                    }
                }
                RuleAction::InstallHasKey => {
                    let class = bindings.get("?class");
                    let keys = bindings.get("?keys").map(|k| split_list(k));
                    if let (Some(class), Some(keys)) = (class, keys) {
                        if let Some(rule) = has_key_rule(class, &keys) {
                            self.install_production(rule, true);
                        }
                    }
                }
                RuleAction::InstallIntersection => {
                    let class = bindings.get("?class");
                    let members = bindings.get("?members").map(|m| split_list(m));
                    if let (Some(class), Some(members)) = (class, members) {
                        if let Some(rule) = intersection_rule(class, &members) {
                            self.install_production(rule, true);
                        }
                    }
                }
            }
        }
    }

    // ---- compilation -------------------------------------------------

    fn get_or_create_alpha(&mut self, constraints: ConstraintSet) -> NodeId {
        if let Some(id) = self.alpha_index.lookup(&constraints) {
            return id;
        }
        let id = NodeId::from_index(self.nodes.len());
        self.nodes.push(NodeKind::Alpha(AlphaMemoryNode::default()));
        self.alpha_index.register(constraints.clone(), id);

        // Backfill from live working memory; no successors exist yet.
        let members: Vec<WmeId> = self
            .wmes
            .iter()
            .enumerate()
            .filter(|(_, w)| w.live && w.fact.satisfies(&constraints))
            .map(|(i, _)| WmeId::from_index(i))
            .collect();
        for wid in members {
            let alpha = self.alpha_mut(id);
            alpha.wme_set.insert(wid);
            alpha.wmes.push(wid);
            self.wmes[wid.index()].alpha_memberships.push(id);
        }
        id
    }

    fn install_production(&mut self, rule: RuleDef, from_template: bool) {
        if rule.patterns.is_empty() || self.productions_by_name.contains_key(&rule.name) {
            return;
        }

        let mut remaining_filters: Vec<(Expr, HashSet<String>)> = rule
            .filters
            .iter()
            .map(|f| {
                let mut vars = HashSet::new();
                collect_vars(f, &mut vars);
                (f.clone(), vars)
            })
            .collect();

        let mut current_beta = self.root_beta;
        let mut bound: HashSet<String> = HashSet::new();

        for (i, pattern) in rule.patterns.iter().enumerate() {
            let alpha_id = self.get_or_create_alpha(pattern.constraints());

            let mut join_vars: Vec<String> = pattern
                .vars()
                .into_iter()
                .filter(|v| bound.contains(v))
                .collect();
            join_vars.sort();
            bound.extend(pattern.vars());

            let mut filters: Vec<Expr> = Vec::new();
            remaining_filters.retain(|(expr, vars)| {
                if vars.iter().all(|v| bound.contains(v)) {
                    filters.push(expr.clone());
                    false
                } else {
                    true
                }
            });
            // Filters over variables no pattern ever binds would make the
            // rule unfireable; attaching them to the last join keeps the
            // malformed-rule policy (it silently never fires).
            if i + 1 == rule.patterns.len() {
                filters.extend(remaining_filters.drain(..).map(|(expr, _)| expr));
            }

            let out_beta = NodeId::from_index(self.nodes.len());
            self.nodes.push(NodeKind::Beta(BetaMemoryNode::default()));
            let join_id = NodeId::from_index(self.nodes.len());
            self.nodes.push(NodeKind::Join(JoinNode {
                left: current_beta,
                right: alpha_id,
                pattern: pattern.clone(),
                join_vars,
                filters,
                out: out_beta,
                left_index: HashMap::new(),
                right_index: HashMap::new(),
            }));

            self.beta_mut(current_beta).successors.push(join_id);
            self.alpha_mut(alpha_id).successors.push(join_id);

            // Seed: index the alpha side silently, then left-activate the
            // existing tokens so each pre-existing match is built once.
            let right = self.join(join_id).right;
            let wmes = {
                let NodeKind::Alpha(alpha) = &self.nodes[right.index()] else {
                    unreachable!("alpha expected")
                };
                alpha.wmes.clone()
            };
            for wid in wmes {
                if !self.wmes[wid.index()].live {
                    continue;
                }
                if let Some((key, _)) = self.join_key_from_wme(join_id, wid) {
                    self.join_mut(join_id)
                        .right_index
                        .entry(key)
                        .or_default()
                        .push(wid);
                }
            }
            let left = self.join(join_id).left;
            let tokens = self.beta(left).tokens.clone();
            for tid in tokens {
                if self.tokens[tid.index()].live {
                    self.join_left_activation(join_id, tid);
                }
            }

            current_beta = out_beta;
        }

        let prod_id = NodeId::from_index(self.nodes.len());
        self.nodes.push(NodeKind::Production(ProductionNode {
            name: rule.name.clone(),
            action: rule.action.clone(),
            left: current_beta,
            refraction: HashSet::new(),
            firings: 0,
        }));
        self.beta_mut(current_beta).successors.push(prod_id);
        self.productions_by_name.insert(rule.name.clone(), prod_id);
        if from_template {
            self.installed.push(rule);
        }

        let feed = match &self.nodes[prod_id.index()] {
            NodeKind::Production(prod) => prod.left,
            _ => unreachable!("production expected"),
        };
        let matches = self.beta(feed).tokens.clone();
        for tid in matches {
            if self.tokens[tid.index()].live {
                self.agenda.push_back((prod_id, tid));
            }
        }
    }

    // ---- retraction --------------------------------------------------

    fn retract_wme(&mut self, wid: WmeId) {
        if !self.wmes[wid.index()].live {
            return;
        }
        self.wmes[wid.index()].live = false;
        let signature = self.wmes[wid.index()].signature;
        self.wme_by_sig.remove(&signature);

        let memberships = self.wmes[wid.index()].alpha_memberships.clone();
        for memory in memberships {
            let successors = {
                let alpha = self.alpha_mut(memory);
                alpha.wme_set.remove(&wid);
                alpha.wmes.retain(|w| *w != wid);
                alpha.successors.clone()
            };
            for join_id in successors {
                if let Some((key, _)) = self.join_key_from_wme(join_id, wid) {
                    if let Some(bucket) = self.join_mut(join_id).right_index.get_mut(&key) {
                        bucket.retain(|w| *w != wid);
                    }
                }
            }
        }

        let dependents = self.wmes[wid.index()].dependent_tokens.clone();
        for tid in dependents {
            self.retract_token(tid);
        }
    }

    fn retract_token(&mut self, tid: TokenId) {
        if !self.tokens[tid.index()].live {
            return;
        }
        self.tokens[tid.index()].live = false;

        let owner = self.tokens[tid.index()].owner;
        let dedup_key = match (self.tokens[tid.index()].parent, self.tokens[tid.index()].wme) {
            (Some(parent), Some(wme)) => Some((parent, wme)),
            _ => None,
        };
        let successors = {
            let beta = self.beta_mut(owner);
            beta.tokens.retain(|t| *t != tid);
            if let Some(key) = dedup_key {
                beta.dedup.remove(&key);
            }
            beta.successors.clone()
        };
        for succ in successors {
            match &mut self.nodes[succ.index()] {
                NodeKind::Join(join) => {
                    let mut key = Vec::with_capacity(join.join_vars.len());
                    let mut complete = true;
                    for var in &join.join_vars {
                        match self.tokens[tid.index()].bindings.get(var) {
                            Some(value) => key.push(value.clone()),
                            None => {
                                complete = false;
                                break;
                            }
                        }
                    }
                    if complete {
                        if let Some(bucket) = join.left_index.get_mut(&key) {
                            bucket.retain(|t| *t != tid);
                        }
                    }
                }
                NodeKind::Production(prod) => {
                    prod.refraction.remove(&tid);
                }
                _ => {}
            }
        }

        let children = self.tokens[tid.index()].children.clone();
        for child in children {
            self.retract_token(child);
        }

        let justified = self.tokens[tid.index()].justified.clone();
        for wid in justified {
            if !self.wmes[wid.index()].live {
                continue;
            }
            self.wmes[wid.index()].support.remove(&tid);
            let signature = self.wmes[wid.index()].signature;
            if self.wmes[wid.index()].support.is_empty() && !self.registry.is_asserted(signature) {
                self.retract_wme(wid);
            }
        }
    }

    /// Drop inferred WMEs whose only remaining support is circular, e.g. a
    /// symmetric pair justifying each other after the asserted half was
    /// retracted. Groundedness is computed from the asserted set through
    /// live token chains.
    fn sweep_ungrounded(&mut self) {
        let mut grounded: HashSet<WmeId> = self
            .wmes
            .iter()
            .enumerate()
            .filter(|(_, w)| w.live && self.registry.is_asserted(w.signature))
            .map(|(i, _)| WmeId::from_index(i))
            .collect();

        let mut changed = true;
        while changed {
            changed = false;
            for (i, token) in self.tokens.iter().enumerate() {
                if !token.live || token.justified.is_empty() {
                    continue;
                }
                let tid = TokenId::from_index(i);
                if !self.token_chain_grounded(tid, &grounded) {
                    continue;
                }
                for wid in &token.justified {
                    if self.wmes[wid.index()].live && grounded.insert(*wid) {
                        changed = true;
                    }
                }
            }
        }

        let victims: Vec<WmeId> = self
            .wmes
            .iter()
            .enumerate()
            .filter(|(i, w)| w.live && !grounded.contains(&WmeId::from_index(*i)))
            .map(|(i, _)| WmeId::from_index(i))
            .collect();
        for wid in victims {
            self.retract_wme(wid);
        }
    }

    fn token_chain_grounded(&self, tid: TokenId, grounded: &HashSet<WmeId>) -> bool {
        let mut cursor = Some(tid);
        while let Some(current) = cursor {
            let token = &self.tokens[current.index()];
            if !token.live {
                return false;
            }
            if let Some(wid) = token.wme {
                if !grounded.contains(&wid) {
                    return false;
                }
            }
            cursor = token.parent;
        }
        true
    }
}
