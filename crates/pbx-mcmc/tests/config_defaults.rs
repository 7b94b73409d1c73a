use pbx_mcmc::RunConfig;

#[test]
fn minimal_yaml_takes_defaults() {
    let config = RunConfig::from_yaml_str("cycles: 12\n").unwrap();
    assert_eq!(config.cycles, 12);
    assert_eq!(config.burn_in, 0);
    assert_eq!(config.thinning, 1);
    assert_eq!(config.workers, 2);
    assert_eq!(config.model.max_components, 4);
    assert!(!config.model.flags.fix_exchangeabilities);
    assert!(config.model.empirical_prior.is_none());
    assert_eq!(config.moves.profile_step, 0.1);
    assert!(config.output.run_directory.is_none());
}

#[test]
fn nested_sections_override_fields() {
    let yaml = r#"
cycles: 3
workers: 5
model:
  max_components: 8
  flags:
    fix_exchangeabilities: true
moves:
  realloc_reps: 4
seed_policy:
  master_seed: 42
  label: smoke
output:
  run_directory: out
"#;
    let config = RunConfig::from_yaml_str(yaml).unwrap();
    assert_eq!(config.workers, 5);
    assert_eq!(config.model.max_components, 8);
    assert_eq!(config.model.rate_categories, 4);
    assert!(config.model.flags.fix_exchangeabilities);
    assert_eq!(config.moves.realloc_reps, 4);
    assert_eq!(config.moves.profile_reps, 1);
    assert_eq!(config.seed_policy.master_seed, 42);
    assert_eq!(config.seed_policy.label.as_deref(), Some("smoke"));
    assert_eq!(
        config.output.run_directory.as_deref(),
        Some(std::path::Path::new("out"))
    );
}

#[test]
fn invalid_values_name_the_field() {
    let err = RunConfig::from_yaml_str("cycles: 1\nworkers: 0\n").unwrap_err();
    assert_eq!(err.info().code, "config-invalid");
    assert_eq!(err.info().context.get("field").map(String::as_str), Some("workers"));
    assert!(err.info().hint.is_some());

    let err = RunConfig::from_yaml_str("cycles: 1\nthinning: 0\n").unwrap_err();
    assert_eq!(err.info().context.get("field").map(String::as_str), Some("thinning"));

    let err = RunConfig::from_yaml_str("cycles: 1\nmoves:\n  profile_step: -1.0\n").unwrap_err();
    assert_eq!(
        err.info().context.get("field").map(String::as_str),
        Some("moves.profile_step")
    );
}

#[test]
fn malformed_yaml_is_a_parse_error() {
    let err = RunConfig::from_yaml_str("cycles: [").unwrap_err();
    assert_eq!(err.info().code, "config-parse");
    let err = RunConfig::load(std::path::Path::new("/nonexistent/run.yaml")).unwrap_err();
    assert_eq!(err.info().code, "config-read");
}
