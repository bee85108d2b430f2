//! Built-in features: ISUPPORT application, user/channel tracking, and
//! SASL authentication.
//!
//! These cover the protocol bookkeeping every client wants; user code
//! composes its own features next to them via
//! [`FeatureSet::featurize`](crate::features::FeatureSet::featurize).

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::event::Event;
use crate::features::{CapOutcome, CapRequest, Context, Feature};
use crate::message::Message;
use crate::sasl::{External, Mechanism, Plain, SaslOutcome, SaslSession, SaslState};

/// Applies `RPL_ISUPPORT` tokens to the live protocol parameters.
///
/// When `CASEMAPPING` changes after state already exists, the tracker
/// tables are re-keyed under the new mapping.
#[derive(Default)]
pub struct IsupportFeature;

#[async_trait(?Send)]
impl Feature for IsupportFeature {
    fn name(&self) -> &'static str {
        "isupport"
    }

    fn subscriptions(&self) -> Vec<String> {
        vec!["005".into()]
    }

    async fn on_raw(&mut self, ctx: &mut Context<'_>, msg: &Message) -> Result<(), ClientError> {
        let before = ctx.params.casemapping;
        let unknown = ctx.params.apply_message(msg);
        if ctx.params.casemapping != before {
            debug!(mapping = ctx.params.casemapping.as_str(), "re-keying state");
            let params = ctx.params.clone();
            ctx.tracker.rekey(&params);
        }
        for (name, value) in unknown {
            ctx.emit(Event::Isupport { name, value });
        }
        Ok(())
    }
}

/// Tracks users, channels and memberships from server messages, and
/// requests the capabilities that feed the tracker.
#[derive(Default)]
pub struct TrackingFeature {
    /// Issue a WHO after joining a channel to backfill user details.
    who_on_join: bool,
}

impl TrackingFeature {
    /// Create the tracking feature.
    pub fn new(who_on_join: bool) -> Self {
        TrackingFeature { who_on_join }
    }
}

#[async_trait(?Send)]
impl Feature for TrackingFeature {
    fn name(&self) -> &'static str {
        "tracking"
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["isupport"]
    }

    fn subscriptions(&self) -> Vec<String> {
        [
            "JOIN", "PART", "KICK", "QUIT", "NICK", "MODE", "TOPIC", "AWAY", "ACCOUNT",
            "CHGHOST", "PRIVMSG", "NOTICE", "332", "333", "353", "366", "352", "730", "731",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    fn cap_available(&mut self, name: &str, _value: Option<&str>) -> CapRequest {
        match name {
            "multi-prefix" | "userhost-in-names" | "away-notify" | "account-notify"
            | "extended-join" | "chghost" => CapRequest::Request,
            _ => CapRequest::Ignore,
        }
    }

    async fn on_raw(&mut self, ctx: &mut Context<'_>, msg: &Message) -> Result<(), ClientError> {
        let params = ctx.params.clone();
        let events = ctx.tracker.handle(&params, msg);
        for event in events {
            if let Event::Join { channel, who } = &event {
                if self.who_on_join && ctx.tracker.is_self(&params, who) {
                    ctx.send(Message::who(channel.clone()));
                }
            }
            ctx.emit(event);
        }
        Ok(())
    }
}

/// SASL configuration distilled from the client config.
#[derive(Clone, Debug, Default)]
pub struct SaslConfig {
    /// Mechanism name; `None` selects PLAIN, or EXTERNAL when a client
    /// certificate is configured.
    pub mechanism: Option<String>,
    /// Account name for PLAIN.
    pub username: Option<String>,
    /// Password for PLAIN.
    pub password: Option<String>,
    /// Authorization identity, if different from the account.
    pub identity: Option<String>,
    /// Whether a TLS client certificate is configured (enables
    /// EXTERNAL).
    pub has_client_cert: bool,
    /// Escalate authentication failure to a disconnect.
    pub required: bool,
}

impl SaslConfig {
    /// Whether enough is configured to attempt authentication.
    pub fn is_configured(&self) -> bool {
        self.mechanism.is_some()
            || (self.username.is_some() && self.password.is_some())
            || self.has_client_cert
    }

    fn build_mechanism(&self) -> Option<Box<dyn Mechanism>> {
        let name = self
            .mechanism
            .clone()
            .unwrap_or_else(|| {
                if self.has_client_cert && self.username.is_none() {
                    "EXTERNAL".to_string()
                } else {
                    "PLAIN".to_string()
                }
            })
            .to_ascii_uppercase();
        match name.as_str() {
            "PLAIN" => {
                let username = self.username.clone()?;
                let password = self.password.clone()?;
                Some(Box::new(Plain::with_identity(
                    self.identity.clone().unwrap_or_default(),
                    username,
                    password,
                )))
            }
            "EXTERNAL" => Some(Box::new(External::new(self.identity.clone()))),
            other => {
                warn!(mechanism = other, "unsupported SASL mechanism");
                None
            }
        }
    }
}

/// Drives SASL inside capability negotiation.
pub struct SaslFeature {
    config: SaslConfig,
    session: Option<SaslSession>,
}

impl SaslFeature {
    /// Create the SASL feature.
    pub fn new(config: SaslConfig) -> Self {
        SaslFeature {
            config,
            session: None,
        }
    }

    fn mechanism_name(&self) -> String {
        self.config
            .mechanism
            .clone()
            .unwrap_or_else(|| {
                if self.config.has_client_cert && self.config.username.is_none() {
                    "EXTERNAL".to_string()
                } else {
                    "PLAIN".to_string()
                }
            })
            .to_ascii_uppercase()
    }
}

#[async_trait(?Send)]
impl Feature for SaslFeature {
    fn name(&self) -> &'static str {
        "sasl"
    }

    fn subscriptions(&self) -> Vec<String> {
        ["AUTHENTICATE", "900", "902", "903", "904", "905", "906", "907", "908"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn cap_available(&mut self, name: &str, value: Option<&str>) -> CapRequest {
        if name != "sasl" || !self.config.is_configured() {
            return CapRequest::Ignore;
        }
        // CAP 302 advertises the mechanism list as the value.
        if let Some(mechs) = value {
            let want = self.mechanism_name();
            if !mechs.is_empty()
                && !mechs.split(',').any(|m| m.eq_ignore_ascii_case(&want))
            {
                warn!(
                    mechanism = %want,
                    advertised = mechs,
                    "server does not offer our SASL mechanism"
                );
                return CapRequest::Ignore;
            }
        }
        CapRequest::Request
    }

    async fn cap_enabled(&mut self, ctx: &mut Context<'_>, name: &str) -> CapOutcome {
        if name != "sasl" {
            return CapOutcome::Negotiated;
        }
        let Some(mechanism) = self.config.build_mechanism() else {
            return CapOutcome::Failed;
        };
        let mut session = SaslSession::new(mechanism);
        ctx.send(session.begin());
        self.session = Some(session);
        CapOutcome::Negotiating
    }

    async fn cap_disabled(&mut self, ctx: &mut Context<'_>, name: &str) {
        if name != "sasl" {
            return;
        }
        if let Some(session) = self.session.as_mut() {
            if matches!(
                session.state(),
                SaslState::MechanismSent | SaslState::Exchanging
            ) {
                ctx.send(session.abort());
            }
        }
        self.session = None;
    }

    async fn on_raw(&mut self, ctx: &mut Context<'_>, msg: &Message) -> Result<(), ClientError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };

        if msg.command == "AUTHENTICATE" {
            let payload = msg.param(0).unwrap_or("+");
            match session.on_challenge(payload) {
                Ok(responses) => {
                    for response in responses {
                        ctx.send(response);
                    }
                }
                Err(err) => {
                    warn!(%err, "SASL challenge failed");
                    ctx.send(session.abort());
                    ctx.capability_negotiated("sasl", false);
                    self.session = None;
                    if self.config.required {
                        return Err(err);
                    }
                }
            }
            return Ok(());
        }

        if let Some(code) = msg.numeric() {
            match session.on_numeric(code, msg) {
                SaslOutcome::Continue => {}
                SaslOutcome::Success => {
                    debug!("SASL authentication succeeded");
                    ctx.capability_negotiated("sasl", true);
                    self.session = None;
                }
                SaslOutcome::Failure(reason) => {
                    warn!(%reason, "SASL authentication failed");
                    ctx.capability_negotiated("sasl", false);
                    self.session = None;
                    if self.config.required {
                        return Err(ClientError::AuthenticationFailed(reason));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sasl_config_detection() {
        assert!(!SaslConfig::default().is_configured());
        let cfg = SaslConfig {
            username: Some("u".into()),
            password: Some("p".into()),
            ..Default::default()
        };
        assert!(cfg.is_configured());
        let cfg = SaslConfig {
            has_client_cert: true,
            ..Default::default()
        };
        assert!(cfg.is_configured());
    }

    #[test]
    fn test_mechanism_selection() {
        let cfg = SaslConfig {
            username: Some("u".into()),
            password: Some("p".into()),
            ..Default::default()
        };
        assert_eq!(SaslFeature::new(cfg).mechanism_name(), "PLAIN");

        let cfg = SaslConfig {
            has_client_cert: true,
            ..Default::default()
        };
        assert_eq!(SaslFeature::new(cfg).mechanism_name(), "EXTERNAL");

        let cfg = SaslConfig {
            mechanism: Some("external".into()),
            username: Some("u".into()),
            password: Some("p".into()),
            ..Default::default()
        };
        assert_eq!(SaslFeature::new(cfg).mechanism_name(), "EXTERNAL");
    }

    #[test]
    fn test_cap_available_checks_mechanism_list() {
        let cfg = SaslConfig {
            username: Some("u".into()),
            password: Some("p".into()),
            ..Default::default()
        };
        let mut feature = SaslFeature::new(cfg);
        assert_eq!(
            feature.cap_available("sasl", Some("PLAIN,EXTERNAL")),
            CapRequest::Request
        );
        assert_eq!(
            feature.cap_available("sasl", Some("EXTERNAL")),
            CapRequest::Ignore
        );
        assert_eq!(feature.cap_available("sasl", None), CapRequest::Request);
        assert_eq!(feature.cap_available("other", None), CapRequest::Ignore);
    }

    #[test]
    fn test_unconfigured_sasl_ignores_cap() {
        let mut feature = SaslFeature::new(SaslConfig::default());
        assert_eq!(feature.cap_available("sasl", None), CapRequest::Ignore);
    }
}
