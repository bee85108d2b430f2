//! Composable client features.
//!
//! A [`Feature`] packages a set of raw-message handlers, capability
//! hooks and event hooks. [`FeatureSet::featurize`] linearizes features
//! with a C3 merge over their declared dependencies, so every feature
//! runs before the features it builds on and the written order is
//! preserved everywhere it can be. Dispatch tables are built once, at
//! construction.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::caps::CapNegotiator;
use crate::error::ClientError;
use crate::event::Event;
use crate::isupport::ProtocolParameters;
use crate::message::Message;
use crate::track::Tracker;

/// What to do with an advertised capability.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CapRequest {
    /// Not interested.
    Ignore,
    /// Request it.
    Request,
    /// Request it with a value (`name=value`).
    RequestWithValue(String),
}

/// How an acknowledged capability resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CapOutcome {
    /// Enabled, nothing more to do.
    Negotiated,
    /// The feature keeps negotiating; it must later call
    /// [`Context::capability_negotiated`].
    Negotiating,
    /// The feature cannot use it; disable it on the server.
    Failed,
}

/// Mutable view of the client handed to feature hooks.
///
/// Sends are queued, not written: they go to the outbound path after
/// the current handler completes, preserving dispatch order.
pub struct Context<'a> {
    /// Live protocol parameters.
    pub params: &'a mut ProtocolParameters,
    /// Tracked users and channels.
    pub tracker: &'a mut Tracker,
    /// Capability negotiation state.
    pub caps: &'a mut CapNegotiator,
    nickname: &'a str,
    outbox: &'a mut Vec<Message>,
    events: &'a mut Vec<Event>,
    cap_results: &'a mut Vec<(String, bool)>,
}

impl<'a> Context<'a> {
    /// Assemble a context. Used by the dispatcher.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        params: &'a mut ProtocolParameters,
        tracker: &'a mut Tracker,
        caps: &'a mut CapNegotiator,
        nickname: &'a str,
        outbox: &'a mut Vec<Message>,
        events: &'a mut Vec<Event>,
        cap_results: &'a mut Vec<(String, bool)>,
    ) -> Self {
        Context {
            params,
            tracker,
            caps,
            nickname,
            outbox,
            events,
            cap_results,
        }
    }

    /// Our current nickname.
    pub fn nickname(&self) -> &str {
        self.nickname
    }

    /// Queue a message for sending.
    pub fn send(&mut self, msg: Message) {
        self.outbox.push(msg);
    }

    /// Emit a high-level event to later features and the application.
    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Resolve a deferred capability negotiation.
    pub fn capability_negotiated(&mut self, name: &str, success: bool) {
        self.cap_results.push((name.to_string(), success));
    }
}

/// A unit of client behavior, composed via [`FeatureSet::featurize`].
#[async_trait(?Send)]
pub trait Feature {
    /// Unique feature name, used in dependency declarations.
    fn name(&self) -> &'static str;

    /// Features that must run after this one in dispatch order.
    fn dependencies(&self) -> &'static [&'static str] {
        &[]
    }

    /// Raw commands this feature handles (upper-case words or
    /// zero-padded numerics). `"*"` subscribes to every message.
    fn subscriptions(&self) -> Vec<String> {
        Vec::new()
    }

    /// Handle a subscribed raw message.
    async fn on_raw(&mut self, ctx: &mut Context<'_>, msg: &Message) -> Result<(), ClientError> {
        let _ = (ctx, msg);
        Ok(())
    }

    /// An advertised capability: request it?
    fn cap_available(&mut self, name: &str, value: Option<&str>) -> CapRequest {
        let _ = (name, value);
        CapRequest::Ignore
    }

    /// A requested capability was acknowledged.
    async fn cap_enabled(&mut self, ctx: &mut Context<'_>, name: &str) -> CapOutcome {
        let _ = (ctx, name);
        CapOutcome::Negotiated
    }

    /// A capability was rejected or disabled after acknowledgement.
    async fn cap_disabled(&mut self, ctx: &mut Context<'_>, name: &str) {
        let _ = (ctx, name);
    }

    /// A high-level event, after all raw handlers ran.
    async fn on_event(&mut self, ctx: &mut Context<'_>, event: &Event) -> Result<(), ClientError> {
        let _ = (ctx, event);
        Ok(())
    }
}

/// Errors from feature linearization.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeatureOrderError {
    /// No order satisfies the dependency and input-order constraints.
    #[error("inconsistent feature order")]
    InconsistentFeatureOrder,

    /// A declared dependency is not part of the set.
    #[error("missing feature dependency: {0}")]
    MissingDependency(String),

    /// The same feature was given twice.
    #[error("duplicate feature: {0}")]
    DuplicateFeature(String),
}

/// C3 linearization over `(name, dependencies)` declarations.
///
/// The output satisfies: every feature precedes its dependencies, and
/// the relative order of the input and of each dependency list is kept.
pub fn linearize(
    declarations: &[(&'static str, Vec<&'static str>)],
) -> Result<Vec<&'static str>, FeatureOrderError> {
    let deps: HashMap<&str, &[&'static str]> = declarations
        .iter()
        .map(|(name, d)| (*name, d.as_slice()))
        .collect();
    if deps.len() != declarations.len() {
        for (i, (name, _)) in declarations.iter().enumerate() {
            if declarations[..i].iter().any(|(n, _)| n == name) {
                return Err(FeatureOrderError::DuplicateFeature(name.to_string()));
            }
        }
    }
    for (_, d) in declarations {
        for dep in d {
            if !deps.contains_key(dep) {
                return Err(FeatureOrderError::MissingDependency(dep.to_string()));
            }
        }
    }

    // L(f) = [f] + merge(L(d1), ..., L(dn), [d1, ..., dn])
    fn l_of<'x>(
        name: &'x str,
        deps: &HashMap<&'x str, &'x [&'static str]>,
        visiting: &mut Vec<&'x str>,
        cache: &mut HashMap<&'x str, Vec<&'x str>>,
    ) -> Result<Vec<&'x str>, FeatureOrderError> {
        if let Some(cached) = cache.get(name) {
            return Ok(cached.clone());
        }
        if visiting.contains(&name) {
            return Err(FeatureOrderError::InconsistentFeatureOrder);
        }
        visiting.push(name);
        let direct = deps[name];
        let mut seqs: Vec<Vec<&str>> = Vec::new();
        for &dep in direct {
            seqs.push(l_of(dep, deps, visiting, cache)?);
        }
        if !direct.is_empty() {
            seqs.push(direct.to_vec());
        }
        let mut result = vec![name];
        result.extend(merge(seqs)?);
        visiting.pop();
        cache.insert(name, result.clone());
        Ok(result)
    }

    fn merge<'x>(mut seqs: Vec<Vec<&'x str>>) -> Result<Vec<&'x str>, FeatureOrderError> {
        let mut result = Vec::new();
        loop {
            seqs.retain(|s| !s.is_empty());
            if seqs.is_empty() {
                return Ok(result);
            }
            let head = seqs
                .iter()
                .map(|s| s[0])
                .find(|&h| seqs.iter().all(|s| !s[1..].contains(&h)));
            match head {
                Some(head) => {
                    result.push(head);
                    for s in seqs.iter_mut() {
                        s.retain(|&x| x != head);
                    }
                }
                None => return Err(FeatureOrderError::InconsistentFeatureOrder),
            }
        }
    }

    let mut cache = HashMap::new();
    let mut seqs: Vec<Vec<&str>> = Vec::new();
    for (name, _) in declarations {
        seqs.push(l_of(name.as_ref(), &deps, &mut Vec::new(), &mut cache)?);
    }
    seqs.push(declarations.iter().map(|(n, _)| *n).collect());
    merge(seqs).map(|order| {
        order
            .into_iter()
            .map(|n| *deps.get_key_value(n).unwrap().0)
            .collect()
    })
}

/// A linearized set of features with a prebuilt dispatch table.
pub struct FeatureSet {
    features: Vec<Box<dyn Feature>>,
    subscriptions: HashMap<String, Vec<usize>>,
}

impl FeatureSet {
    /// Linearize `features` and build the dispatch table.
    pub fn featurize(features: Vec<Box<dyn Feature>>) -> Result<Self, FeatureOrderError> {
        let declarations: Vec<(&'static str, Vec<&'static str>)> = features
            .iter()
            .map(|f| (f.name(), f.dependencies().to_vec()))
            .collect();
        let order = linearize(&declarations)?;

        let mut by_name: HashMap<&str, Box<dyn Feature>> =
            features.into_iter().map(|f| (f.name(), f)).collect();
        let features: Vec<Box<dyn Feature>> = order
            .iter()
            .map(|name| by_name.remove(name).unwrap())
            .collect();

        let mut subscriptions: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, feature) in features.iter().enumerate() {
            for command in feature.subscriptions() {
                subscriptions.entry(command).or_default().push(idx);
            }
        }

        Ok(FeatureSet {
            features,
            subscriptions,
        })
    }

    /// An empty feature set.
    pub fn empty() -> Self {
        FeatureSet {
            features: Vec::new(),
            subscriptions: HashMap::new(),
        }
    }

    /// Feature indices subscribed to a command, in dispatch order.
    pub(crate) fn handlers_for(&self, command: &str) -> &[usize] {
        self.subscriptions
            .get(command)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Handler indices for a message: exact subscribers merged with
    /// `"*"` subscribers, deduplicated, in dispatch order.
    pub(crate) fn handlers_for_message(&self, command: &str) -> Vec<usize> {
        let mut indices: Vec<usize> = self
            .handlers_for(command)
            .iter()
            .chain(self.handlers_for("*"))
            .copied()
            .collect();
        indices.sort_unstable();
        indices.dedup();
        indices
    }

    /// Whether any feature handles this command.
    pub(crate) fn handles(&self, command: &str) -> bool {
        self.subscriptions.contains_key(command)
    }

    /// Number of features.
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Feature names in dispatch order.
    pub fn order(&self) -> Vec<&'static str> {
        self.features.iter().map(|f| f.name()).collect()
    }

    /// Mutable access to one feature.
    pub(crate) fn get_mut(&mut self, idx: usize) -> &mut dyn Feature {
        self.features[idx].as_mut()
    }

    /// Mutable iteration in dispatch order.
    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn Feature>> {
        self.features.iter_mut()
    }
}
