//! Interactive elicitation of the config document.
//!
//! The wizard walks a fixed sequence of groups, each gated on answers
//! already bound: provider, global settings, provider basics, optional
//! expert settings, proxy, TLS material, SRE, SMTP and finally component
//! selection. Every answer is checked with the same field rule
//! [`crate::config::validate`] applies to a whole document, and an invalid
//! answer asks the same field again.
//!
//! Terminal I/O sits behind [`Prompter`] so the flow can be driven from a
//! script in tests.

use std::collections::BTreeSet;
use std::path::Path;

use dialoguer::{theme::ColorfulTheme, Confirm, Input, MultiSelect, Password, Select};
use tracing::debug;

use crate::config::{validate, Config, PackageManifest, Provider, SCALES};
use crate::error::{InstallError, Result};
use crate::ui;

/// Terminal capability used by the wizard.
pub trait Prompter {
    /// Free-text answer, pre-filled with `initial`.
    fn input(&mut self, prompt: &str, initial: &str) -> anyhow::Result<String>;

    /// Hidden answer. An empty answer keeps the current value.
    fn password(&mut self, prompt: &str) -> anyhow::Result<String>;

    fn confirm(&mut self, prompt: &str, default: bool) -> anyhow::Result<bool>;

    /// Index of the chosen item.
    fn select(&mut self, prompt: &str, items: &[String], default: usize) -> anyhow::Result<usize>;

    /// Indices of the checked items.
    fn multi_select(
        &mut self,
        prompt: &str,
        items: &[String],
        checked: &[bool],
    ) -> anyhow::Result<Vec<usize>>;
}

/// [`Prompter`] on the controlling terminal.
pub struct DialoguerPrompter {
    theme: ColorfulTheme,
}

impl DialoguerPrompter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            theme: ColorfulTheme::default(),
        }
    }
}

impl Default for DialoguerPrompter {
    fn default() -> Self {
        Self::new()
    }
}

impl Prompter for DialoguerPrompter {
    fn input(&mut self, prompt: &str, initial: &str) -> anyhow::Result<String> {
        let value: String = Input::with_theme(&self.theme)
            .with_prompt(prompt)
            .with_initial_text(initial)
            .allow_empty(true)
            .interact_text()?;
        Ok(value)
    }

    fn password(&mut self, prompt: &str) -> anyhow::Result<String> {
        Ok(Password::with_theme(&self.theme)
            .with_prompt(format!("{prompt} (empty keeps current)"))
            .allow_empty_password(true)
            .interact()?)
    }

    fn confirm(&mut self, prompt: &str, default: bool) -> anyhow::Result<bool> {
        Ok(Confirm::with_theme(&self.theme)
            .with_prompt(prompt)
            .default(default)
            .interact()?)
    }

    fn select(&mut self, prompt: &str, items: &[String], default: usize) -> anyhow::Result<usize> {
        Ok(Select::with_theme(&self.theme)
            .with_prompt(prompt)
            .items(items)
            .default(default)
            .interact()?)
    }

    fn multi_select(
        &mut self,
        prompt: &str,
        items: &[String],
        checked: &[bool],
    ) -> anyhow::Result<Vec<usize>> {
        Ok(MultiSelect::with_theme(&self.theme)
            .with_prompt(prompt)
            .items(items)
            .defaults(checked)
            .interact()?)
    }
}

type Rule = fn(&str) -> std::result::Result<(), String>;

fn any_value(_: &str) -> std::result::Result<(), String> {
    Ok(())
}

fn unanswered(field: &str, error: &anyhow::Error) -> InstallError {
    InstallError::invalid(field, "", format!("no answer: {error:#}"))
}

/// How component selection is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchMode {
    /// Whole packages, expanded to their apps.
    Simple,
    /// Individual apps.
    Advanced,
    /// Keep the prior selection.
    Skip,
}

impl OrchMode {
    fn label(self) -> &'static str {
        match self {
            Self::Simple => "Simple   - select from pre-defined packages (recommended)",
            Self::Advanced => "Advanced - enable/disable each individual app",
            Self::Skip => "Skip     - use existing selection",
        }
    }
}

fn scale_label(scale: u32) -> String {
    match scale {
        10 => "1~10 Edge Nodes".to_string(),
        100 => "10~100 Edge Nodes".to_string(),
        500 => "100~500 Edge Nodes".to_string(),
        1000 => "500~1000 Edge Nodes".to_string(),
        other => format!("1000~{other} Edge Nodes"),
    }
}

/// Stepwise elicitation over a [`Prompter`].
pub struct Wizard<'a> {
    prompter: &'a mut dyn Prompter,
    manifest: &'a PackageManifest,
    expert_mode: bool,
}

impl<'a> Wizard<'a> {
    pub fn new(prompter: &'a mut dyn Prompter, manifest: &'a PackageManifest) -> Self {
        Self {
            prompter,
            manifest,
            expert_mode: false,
        }
    }

    /// Show every optional group without asking first.
    #[must_use]
    pub fn expert_mode(mut self, enabled: bool) -> Self {
        self.expert_mode = enabled;
        self
    }

    /// Elicit every group into `config`, starting from its current values.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::ConfigInvalid`] when the terminal stops
    /// answering.
    pub fn run(&mut self, config: &mut Config) -> Result<()> {
        ui::print_section("Orchestrator Configuration");

        self.provider(config)?;
        self.global(config)?;
        match config.provider {
            Provider::Aws => self.aws(config)?,
            Provider::Onprem => self.onprem(config)?,
        }
        self.proxy(config)?;
        self.cert(config)?;
        self.sre(config)?;
        self.smtp(config)?;
        self.orch(config)?;

        Ok(())
    }

    fn field(&mut self, path: &str, prompt: &str, current: &str, rule: Rule) -> Result<String> {
        loop {
            let answer = self
                .prompter
                .input(prompt, current)
                .map_err(|e| unanswered(path, &e))?;
            let answer = answer.trim().to_string();
            match rule(&answer) {
                Ok(()) => return Ok(answer),
                Err(message) => {
                    debug!(field = %path, "Rejected answer");
                    ui::print_warning(&format!("{prompt}: {message}"));
                }
            }
        }
    }

    fn secret(&mut self, path: &str, prompt: &str, current: &str) -> Result<String> {
        let answer = self
            .prompter
            .password(prompt)
            .map_err(|e| unanswered(path, &e))?;
        if answer.is_empty() {
            Ok(current.to_string())
        } else {
            Ok(answer)
        }
    }

    /// Ask for a PEM file; an empty path keeps `current`.
    fn pem_file(&mut self, path: &str, prompt: &str, current: &str, rule: Rule) -> Result<String> {
        loop {
            let file = self
                .prompter
                .input(&format!("{prompt} file (empty keeps current)"), "")
                .map_err(|e| unanswered(path, &e))?;
            let file = file.trim();
            if file.is_empty() {
                return Ok(current.to_string());
            }
            match std::fs::read_to_string(Path::new(file)) {
                Ok(pem) => match rule(&pem) {
                    Ok(()) => return Ok(pem),
                    Err(message) => ui::print_warning(&format!("{file}: {message}")),
                },
                Err(e) => ui::print_warning(&format!("Cannot read {file}: {e}")),
            }
        }
    }

    fn confirm(&mut self, path: &str, prompt: &str, default: bool) -> Result<bool> {
        self.prompter
            .confirm(prompt, default)
            .map_err(|e| unanswered(path, &e))
    }

    /// Whether to show an optional group.
    fn gate(&mut self, path: &str, prompt: &str) -> Result<bool> {
        if self.expert_mode {
            return Ok(true);
        }
        self.confirm(path, prompt, false)
    }

    fn provider(&mut self, config: &mut Config) -> Result<()> {
        let items = vec!["AWS".to_string(), "On-Premises".to_string()];
        let default = usize::from(config.provider == Provider::Onprem);
        let choice = self
            .prompter
            .select("Infrastructure type", &items, default)
            .map_err(|e| unanswered("provider", &e))?;
        config.provider = if choice == 0 { Provider::Aws } else { Provider::Onprem };
        Ok(())
    }

    fn global(&mut self, config: &mut Config) -> Result<()> {
        let global = &mut config.global;
        global.orch_name = self.field(
            "global.orchName",
            "Orchestrator name",
            &global.orch_name,
            validate::orch_name,
        )?;
        global.parent_domain = self.field(
            "global.parentDomain",
            "Parent domain",
            &global.parent_domain,
            validate::parent_domain,
        )?;
        global.admin_email = self.field(
            "global.adminEmail",
            "Admin email",
            &global.admin_email,
            validate::email,
        )?;

        let items: Vec<String> = SCALES.iter().map(|s| scale_label(*s)).collect();
        let default = SCALES.iter().position(|s| *s == global.scale).unwrap_or(0);
        let choice = self
            .prompter
            .select("Scale", &items, default)
            .map_err(|e| unanswered("global.scale", &e))?;
        global.scale = SCALES.get(choice).copied().unwrap_or(SCALES[0]);
        Ok(())
    }

    fn aws(&mut self, config: &mut Config) -> Result<()> {
        let aws = &mut config.aws;
        aws.region = self.field("aws.region", "AWS region", &aws.region, validate::aws_region)?;

        if !self.gate("aws", "Proceed with AWS expert configuration?")? {
            return Ok(());
        }
        aws.customer_tag = self.field("aws.customerTag", "Custom tag", &aws.customer_tag, any_value)?;
        aws.cache_registry = self.field(
            "aws.cacheRegistry",
            "Container registry cache",
            &aws.cache_registry,
            any_value,
        )?;
        let whitelist = self.field(
            "aws.jumpHostWhitelist",
            "Jump host whitelist (CIDRs)",
            &aws.jump_host_whitelist.join(", "),
            validate::cidr_list,
        )?;
        aws.jump_host_whitelist = whitelist
            .split(',')
            .map(str::trim)
            .filter(|cidr| !cidr.is_empty())
            .map(ToString::to_string)
            .collect();
        aws.vpc_id = self.field("aws.vpcId", "VPC ID", &aws.vpc_id, validate::vpc_id)?;
        aws.reduce_ns_ttl = self.confirm("aws.reduceNsTtl", "Reduce NS TTL", aws.reduce_ns_ttl)?;
        aws.eks_dns_ip = self.field(
            "aws.eksDnsIp",
            "EKS DNS IP",
            &aws.eks_dns_ip,
            validate::optional_ipv4,
        )?;
        Ok(())
    }

    fn onprem(&mut self, config: &mut Config) -> Result<()> {
        let onprem = &mut config.onprem;
        onprem.argo_ip = self.field("onprem.argoIP", "Argo CD IP address", &onprem.argo_ip, validate::ipv4)?;
        onprem.traefik_ip = self.field(
            "onprem.traefikIP",
            "Traefik IP address",
            &onprem.traefik_ip,
            validate::ipv4,
        )?;
        onprem.nginx_ip = self.field("onprem.nginxIP", "NGINX IP address", &onprem.nginx_ip, validate::ipv4)?;

        if onprem.docker_credentials().is_some()
            || !self.gate("onprem", "Proceed with on-prem expert configuration?")?
        {
            return Ok(());
        }
        let username = self.field(
            "onprem.dockerUsername",
            "Docker username",
            &onprem.docker_username,
            any_value,
        )?;
        let token = self.secret("onprem.dockerToken", "Docker token", &onprem.docker_token)?;
        if username.is_empty() != token.is_empty() {
            ui::print_warning("Docker username and token must be given together; ignoring both");
            onprem.docker_username.clear();
            onprem.docker_token.clear();
        } else {
            onprem.docker_username = username;
            onprem.docker_token = token;
        }
        Ok(())
    }

    fn proxy(&mut self, config: &mut Config) -> Result<()> {
        if !self.gate("proxy", "Proceed with proxy configuration?")? {
            return Ok(());
        }
        let proxy = &mut config.proxy;
        proxy.http_proxy = self.field("proxy.httpProxy", "HTTP proxy", &proxy.http_proxy, validate::proxy_url)?;
        proxy.https_proxy = self.field(
            "proxy.httpsProxy",
            "HTTPS proxy",
            &proxy.https_proxy,
            validate::proxy_url,
        )?;
        proxy.socks_proxy = self.field(
            "proxy.socksProxy",
            "SOCKS proxy",
            &proxy.socks_proxy,
            validate::proxy_url,
        )?;
        proxy.no_proxy = self.field("proxy.noProxy", "No proxy", &proxy.no_proxy, validate::no_proxy)?;
        Ok(())
    }

    fn cert(&mut self, config: &mut Config) -> Result<()> {
        if !self.gate("cert", "Proceed with TLS certificate configuration?")? {
            return Ok(());
        }
        let cert = &mut config.cert;
        cert.tls_cert = self.pem_file("cert.tlsCert", "TLS certificate", &cert.tls_cert, validate::pem_certificate)?;
        cert.tls_key = self.pem_file("cert.tlsKey", "TLS key", &cert.tls_key, validate::pem_private_key)?;
        cert.tls_ca = self.pem_file("cert.tlsCa", "TLS CA", &cert.tls_ca, validate::pem_certificate)?;
        Ok(())
    }

    fn sre(&mut self, config: &mut Config) -> Result<()> {
        if !self.gate("sre", "Proceed with SRE configuration?")? {
            return Ok(());
        }
        let sre = &mut config.sre;
        sre.username = self.field("sre.username", "SRE username", &sre.username, any_value)?;
        sre.password = self.secret("sre.password", "SRE password", &sre.password)?;
        sre.secret_url = self.field("sre.secretUrl", "SRE destination URL", &sre.secret_url, any_value)?;
        sre.ca_secret = self.pem_file("sre.caSecret", "SRE CA", &sre.ca_secret, validate::pem_certificate)?;
        Ok(())
    }

    fn smtp(&mut self, config: &mut Config) -> Result<()> {
        if !self.gate("smtp", "Proceed with email notification configuration?")? {
            return Ok(());
        }
        let smtp = &mut config.smtp;
        smtp.username = self.field("smtp.username", "SMTP username", &smtp.username, any_value)?;
        smtp.password = self.secret("smtp.password", "SMTP password", &smtp.password)?;
        smtp.url = self.field("smtp.url", "SMTP server", &smtp.url, any_value)?;
        smtp.port = self.field("smtp.port", "SMTP port", &smtp.port, validate::smtp_port)?;
        smtp.from = self.field("smtp.from", "SMTP from address", &smtp.from, any_value)?;
        Ok(())
    }

    fn orch(&mut self, config: &mut Config) -> Result<()> {
        let mut modes = vec![OrchMode::Simple, OrchMode::Advanced];
        if !config.orch.enabled.is_empty() {
            modes.push(OrchMode::Skip);
        }
        let items: Vec<String> = modes.iter().map(|m| m.label().to_string()).collect();
        let choice = self
            .prompter
            .select("Orchestrator configuration mode", &items, 0)
            .map_err(|e| unanswered("orch.enabled", &e))?;

        match modes.get(choice).copied().unwrap_or(OrchMode::Simple) {
            OrchMode::Simple => config.orch.enabled = self.simple_selection()?,
            OrchMode::Advanced => config.orch.enabled = self.advanced_selection(&config.orch.enabled)?,
            OrchMode::Skip => debug!("Keeping prior component selection"),
        }
        Ok(())
    }

    fn simple_selection(&mut self) -> Result<BTreeSet<String>> {
        let manifest = self.manifest;
        let packages = manifest.sorted_packages();
        let items: Vec<String> = packages
            .iter()
            .map(|(_, p)| format!("{} ({})", p.name, p.description))
            .collect();
        let checked = vec![true; items.len()];

        loop {
            let picked = self
                .prompter
                .multi_select("Select orchestrator packages", &items, &checked)
                .map_err(|e| unanswered("orch.enabled", &e))?;
            let names: BTreeSet<String> = picked
                .iter()
                .filter_map(|i| packages.get(*i))
                .map(|(name, _)| (*name).to_string())
                .collect();

            if let Err(rule) = validate::enabled_set(&names, |n| manifest.is_known_package(n)) {
                ui::print_warning(&rule);
                continue;
            }
            let apps = manifest.expand(names.iter().map(String::as_str));
            match validate::enabled_set(&apps, |tag| manifest.is_known_app(tag)) {
                Ok(()) => return Ok(apps),
                Err(rule) => ui::print_warning(&rule),
            }
        }
    }

    fn advanced_selection(&mut self, current: &BTreeSet<String>) -> Result<BTreeSet<String>> {
        let manifest = self.manifest;
        let apps = manifest.sorted_apps();
        let items: Vec<String> = apps
            .iter()
            .map(|(_, a)| format!("{} ({})", a.name, a.description))
            .collect();
        let checked: Vec<bool> = apps.iter().map(|(tag, _)| current.contains(*tag)).collect();

        loop {
            let picked = self
                .prompter
                .multi_select("Select orchestrator components", &items, &checked)
                .map_err(|e| unanswered("orch.enabled", &e))?;
            let tags: BTreeSet<String> = picked
                .iter()
                .filter_map(|i| apps.get(*i))
                .map(|(tag, _)| (*tag).to_string())
                .collect();
            match validate::enabled_set(&tags, |tag| manifest.is_known_app(tag)) {
                Ok(()) => return Ok(tags),
                Err(rule) => ui::print_warning(&rule),
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::scripted::{text, Answer, ScriptedPrompter};
    use super::*;
    use crate::config::testing::sample_onprem;

    fn manifest() -> PackageManifest {
        PackageManifest::embedded().unwrap()
    }

    fn package_indices(manifest: &PackageManifest, names: &[&str]) -> Vec<usize> {
        manifest
            .sorted_packages()
            .iter()
            .enumerate()
            .filter(|(_, (name, _))| names.contains(name))
            .map(|(i, _)| i)
            .collect()
    }

    /// Provider, global and on-prem basics with every optional group skipped.
    fn onprem_answers(orch_name: &str) -> Vec<Answer> {
        vec![
            Answer::Choice(1),
            text(orch_name),
            text("example.com"),
            text("a@b.c"),
            Answer::Choice(0),
            text("10.0.0.1"),
            text("10.0.0.2"),
            text("10.0.0.3"),
            Answer::Yes(false),
            Answer::Yes(false),
            Answer::Yes(false),
            Answer::Yes(false),
            Answer::Yes(false),
        ]
    }

    #[test]
    fn test_fresh_onprem_simple_mode() {
        let manifest = manifest();
        let wanted = ["fps", "ui", "eim", "ao", "co"];
        let mut answers = onprem_answers("demo");
        answers.push(Answer::Choice(0));
        answers.push(Answer::Choices(package_indices(&manifest, &wanted)));

        let mut prompter = ScriptedPrompter::new(answers);
        let mut config = Config::new();
        Wizard::new(&mut prompter, &manifest).run(&mut config).unwrap();

        assert_eq!(prompter.remaining(), 0);
        assert_eq!(config.provider, Provider::Onprem);
        assert_eq!(config.global.orch_name, "demo");
        assert_eq!(config.global.scale, 10);
        assert_eq!(config.onprem.nginx_ip, "10.0.0.3");
        assert_eq!(config.orch.enabled, manifest.expand(wanted));
        validate::validate(&config, &manifest).unwrap();
    }

    #[test]
    fn test_invalid_answer_asks_again() {
        let manifest = manifest();
        let mut answers = onprem_answers("Demo-1");
        answers.insert(2, text("demo"));
        answers.push(Answer::Choice(0));
        answers.push(Answer::Choices(package_indices(&manifest, &["fps"])));

        let mut prompter = ScriptedPrompter::new(answers);
        let mut config = Config::new();
        Wizard::new(&mut prompter, &manifest).run(&mut config).unwrap();

        let asked = prompter
            .prompts
            .iter()
            .filter(|p| p.as_str() == "Orchestrator name")
            .count();
        assert_eq!(asked, 2);
        assert_eq!(config.global.orch_name, "demo");
    }

    #[test]
    fn test_exhausted_terminal_is_config_invalid() {
        let manifest = manifest();
        let mut prompter = ScriptedPrompter::new(vec![Answer::Choice(1)]);
        let mut config = Config::new();
        let err = Wizard::new(&mut prompter, &manifest)
            .run(&mut config)
            .unwrap_err();
        assert!(matches!(err, InstallError::ConfigInvalid { ref field, .. } if field == "global.orchName"));
    }

    #[test]
    fn test_skip_offered_only_with_prior_selection() {
        let manifest = manifest();
        let mut answers = onprem_answers("demo");
        answers.push(Answer::Choice(2));

        let mut prompter = ScriptedPrompter::new(answers);
        let mut config = sample_onprem();
        let before = config.orch.enabled.clone();
        Wizard::new(&mut prompter, &manifest).run(&mut config).unwrap();
        assert_eq!(config.orch.enabled, before);
        assert_eq!(prompter.menus.last().unwrap().len(), 3);

        let mut answers = onprem_answers("demo");
        answers.push(Answer::Choice(0));
        answers.push(Answer::Choices(package_indices(&manifest, &["fps"])));
        let mut prompter = ScriptedPrompter::new(answers);
        let mut fresh = Config::new();
        Wizard::new(&mut prompter, &manifest).run(&mut fresh).unwrap();
        let mode_menu = prompter
            .menus
            .iter()
            .find(|m| m.iter().any(|item| item.starts_with("Simple")))
            .unwrap();
        assert_eq!(mode_menu.len(), 2);
    }

    #[test]
    fn test_simple_mode_rejects_ui_without_manager() {
        let manifest = manifest();
        let mut answers = onprem_answers("demo");
        answers.push(Answer::Choice(0));
        answers.push(Answer::Choices(package_indices(&manifest, &["fps", "ui"])));
        answers.push(Answer::Choices(package_indices(&manifest, &["fps", "ui", "eim"])));

        let mut prompter = ScriptedPrompter::new(answers);
        let mut config = Config::new();
        Wizard::new(&mut prompter, &manifest).run(&mut config).unwrap();

        assert_eq!(prompter.remaining(), 0);
        assert!(config.is_enabled("ui"));
        assert!(config.is_enabled("eim"));
    }

    #[test]
    fn test_advanced_mode_picks_apps() {
        let manifest = manifest();
        let apps = manifest.sorted_apps();
        let fps = apps.iter().position(|(tag, _)| *tag == "fps").unwrap();

        let mut answers = onprem_answers("demo");
        answers.push(Answer::Choice(1));
        answers.push(Answer::Choices(vec![fps]));

        let mut prompter = ScriptedPrompter::new(answers);
        let mut config = Config::new();
        Wizard::new(&mut prompter, &manifest).run(&mut config).unwrap();
        assert_eq!(config.orch.enabled, ["fps".to_string()].into_iter().collect());
    }

    #[test]
    fn test_half_docker_credentials_dropped() {
        let manifest = manifest();
        let mut answers = onprem_answers("demo");
        answers[8] = Answer::Yes(true);
        answers.insert(9, text("someone"));
        answers.insert(10, text(""));
        answers.push(Answer::Choice(2));

        let mut prompter = ScriptedPrompter::new(answers);
        let mut config = sample_onprem();
        Wizard::new(&mut prompter, &manifest).run(&mut config).unwrap();
        assert!(config.onprem.docker_username.is_empty());
        assert!(config.onprem.docker_credentials().is_none());
    }

    #[test]
    fn test_aws_expert_whitelist_is_split() {
        let manifest = manifest();
        let answers = vec![
            Answer::Choice(0),
            text("demo"),
            text("example.com"),
            text("a@b.c"),
            Answer::Choice(1),
            text("us-west-2"),
            Answer::Yes(true),
            text("team"),
            text(""),
            text("10.0.0.0/8 , 192.168.0.0/16"),
            text("vpc-0123abcd"),
            Answer::Yes(false),
            text(""),
            Answer::Yes(false),
            Answer::Yes(false),
            Answer::Yes(false),
            Answer::Yes(false),
            Answer::Choice(2),
        ];
        let mut prompter = ScriptedPrompter::new(answers);
        let mut config = sample_onprem();
        Wizard::new(&mut prompter, &manifest).run(&mut config).unwrap();

        assert_eq!(config.provider, Provider::Aws);
        assert_eq!(config.global.scale, 100);
        assert_eq!(config.aws.jump_host_whitelist, vec!["10.0.0.0/8", "192.168.0.0/16"]);
        assert_eq!(config.aws.vpc_id, "vpc-0123abcd");
    }

    #[test]
    fn test_expert_mode_skips_confirmations() {
        let manifest = manifest();
        let answers = vec![
            Answer::Choice(1),
            text("demo"),
            text("example.com"),
            text("a@b.c"),
            Answer::Choice(0),
            text("10.0.0.1"),
            text("10.0.0.2"),
            text("10.0.0.3"),
            // docker
            text(""),
            text(""),
            // proxy
            text("http://proxy.example.com:912"),
            text(""),
            text(""),
            text("localhost.local"),
            // cert files
            text(""),
            text(""),
            text(""),
            // sre
            text("sre"),
            text(""),
            text(""),
            text(""),
            // smtp
            text(""),
            text(""),
            text(""),
            text("25"),
            text(""),
            Answer::Choice(2),
        ];
        let mut prompter = ScriptedPrompter::new(answers);
        let mut config = sample_onprem();
        Wizard::new(&mut prompter, &manifest)
            .expert_mode(true)
            .run(&mut config)
            .unwrap();

        assert_eq!(prompter.remaining(), 0);
        assert_eq!(config.proxy.http_proxy, "http://proxy.example.com:912");
        assert_eq!(config.sre.username, "sre");
        assert_eq!(config.smtp.port, "25");
    }

    #[test]
    fn test_cert_is_read_from_file() {
        let manifest = manifest();
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.pem");
        let good = dir.path().join("ca.pem");
        std::fs::write(&bad, "not a cert").unwrap();
        let pem = "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n";
        std::fs::write(&good, pem).unwrap();

        let mut answers = onprem_answers("demo");
        answers[10] = Answer::Yes(true);
        let cert_answers = vec![
            text(""),
            text(""),
            text(bad.to_str().unwrap()),
            text(good.to_str().unwrap()),
        ];
        for (offset, answer) in cert_answers.into_iter().enumerate() {
            answers.insert(11 + offset, answer);
        }
        answers.push(Answer::Choice(2));

        let mut prompter = ScriptedPrompter::new(answers);
        let mut config = sample_onprem();
        Wizard::new(&mut prompter, &manifest).run(&mut config).unwrap();
        assert_eq!(config.cert.tls_ca, pem);
        assert!(config.cert.tls_cert.is_empty());
    }
}
