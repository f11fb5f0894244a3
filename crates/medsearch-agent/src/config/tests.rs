#[cfg(test)]
mod tests {
    use super::super::*;
    use medsearch_common::StrategyKind;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.search.databases, vec!["pubmed", "fda-drugs", "ema-medicines", "mhra", "tga-cmi"]);
        assert_eq!(config.search.max_results, 10);
        assert!(!config.search.parallel);
        assert_eq!(config.search.max_workers, 4);
        assert_eq!(config.tracker.stats_path, PathBuf::from("success_rates.json"));
        assert_eq!(config.captcha.service, "2captcha");
        assert_eq!(config.pubmed.api_key_env, "NCBI_API_KEY");
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.search.max_workers, 4);
        assert_eq!(config.retry.initial_delay_ms, 1_000);
        assert!(config.sources.is_empty());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.search.max_results, 10);
    }

    #[test]
    fn test_malformed_file_is_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[search]\nmax_results = \"many\"").unwrap();
        assert!(Config::load_from(file.path()).is_err());
    }

    #[test]
    fn test_partial_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
    [search]
    databases = ["pubmed"]
    parallel = true

    [retry]
    initial_delay_ms = 250
    jitter_factor = 3.0

    [tracker]
    stats_path = "/var/lib/medsearch/success_rates.json"
    "#
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.search.databases, vec!["pubmed"]);
        assert!(config.search.parallel);
        assert_eq!(config.search.max_workers, 4);
        assert_eq!(config.tracker.stats_path, PathBuf::from("/var/lib/medsearch/success_rates.json"));

        let policy = config.retry.policy();
        assert_eq!(policy.initial_delay, Duration::from_millis(250));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert_eq!(policy.jitter_factor, 1.0);
    }

    #[test]
    fn test_non_finite_retry_factors_rejected() {
        for bad in ["jitter_factor = nan", "jitter_factor = -0.5", "backoff_factor = inf", "backoff_factor = 0.0"] {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            writeln!(file, "[retry]\n{bad}").unwrap();
            let err = Config::load_from(file.path()).unwrap_err();
            assert!(err.to_string().contains("retry."), "{bad}: {err}");
        }
    }

    #[test]
    fn test_drugbank_key_from_env() {
        let config = Config {
            drugbank: DrugBankConfig { api_key_env: "MEDSEARCH_TEST_UNSET_DRUGBANK_KEY".into() },
            ..Config::default()
        };
        assert!(config.api_keys().drugbank.is_none());
        assert_eq!(Config::default().drugbank.api_key_env, "DRUGBANK_API_KEY");
    }

    #[test]
    fn test_selected_databases_appends_commercial_once() {
        let search = SearchConfig {
            databases: vec!["pubmed".into(), "chembl".into()],
            ..SearchConfig::default()
        };
        assert_eq!(search.selected_databases(false), vec!["pubmed", "chembl"]);
        assert_eq!(search.selected_databases(true), vec!["pubmed", "chembl", "drugbank", "rxnav"]);
    }

    #[test]
    fn test_source_overrides_merge_over_builtin() {
        let config: Config = toml::from_str(
            r#"
    [sources.pubmed]
    name = "PubMed (mirror)"
    requests_per_minute = 3
    access_methods = ["api"]

    [sources.local-formulary]
    name = "Local Formulary"
    url = "https://formulary.example.org/"
    "#,
        )
        .unwrap();

        let catalog = config.catalog();
        let pubmed = catalog.get_database_config("pubmed");
        assert_eq!(pubmed.name, "PubMed (mirror)");
        assert_eq!(pubmed.requests_per_minute, 3);
        assert_eq!(pubmed.access_methods, vec![StrategyKind::Api]);

        assert!(catalog.contains("local-formulary"));
        assert_eq!(catalog.get_database_config("local-formulary").max_retries, 3);
        assert_eq!(catalog.get_database_config("mhra").name, "MHRA");
    }

    #[test]
    fn test_unknown_captcha_service_has_no_solver() {
        let captcha = CaptchaConfig {
            service: "anticaptcha".into(),
            api_key_env: "PATH".into(),
            ..CaptchaConfig::default()
        };
        let client = SandboxClient::new(Duration::from_secs(5)).unwrap();
        assert!(captcha.solver(client).is_none());
    }

    #[test]
    fn test_missing_captcha_key_has_no_solver() {
        let captcha = CaptchaConfig {
            api_key_env: "MEDSEARCH_TEST_UNSET_CAPTCHA_KEY".into(),
            ..CaptchaConfig::default()
        };
        let client = SandboxClient::new(Duration::from_secs(5)).unwrap();
        assert!(captcha.solver(client).is_none());
    }
}
