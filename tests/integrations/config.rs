//! Configuration layering: defaults, file, environment and command line.

use certfeed::{cli::Cli, config::Config};
use clap::Parser;
use figment::Jail;
use std::path::PathBuf;

#[test]
fn test_defaults_apply_without_a_file() {
    Jail::expect_with(|_jail| {
        let config = Config::load(&Cli::parse_from(["certfeed"])).unwrap();
        assert_eq!(config.server.path, "/ws");
        assert_eq!(config.polling.batch_size, 100);
        assert_eq!(config.deduplication.window_seconds, 300);
        assert!(config.output.file.is_none());
        assert!(!config.metrics.enabled);
        Ok(())
    });
}

#[test]
fn test_file_then_environment_then_flags() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "certfeed.toml",
            r#"
                log_level = "debug"

                [server]
                listen_address = "127.0.0.1:7000"
                path = "/stream"

                [deduplication]
                window_seconds = 120

                [polling]
                batch_size = 32
            "#,
        )?;
        jail.set_env("CERTFEED_SERVER__PATH", "/feed");
        jail.set_env("CERTFEED_POLLING__BATCH_SIZE", "64");

        let cli = Cli::parse_from(["certfeed", "--dedup-window", "30", "--metrics"]);
        let config = Config::load(&cli).unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.server.listen_address.port(), 7000);
        assert_eq!(config.server.path, "/feed");
        assert_eq!(config.polling.batch_size, 64);
        assert_eq!(config.deduplication.window_seconds, 30);
        assert!(config.metrics.enabled);
        // Keys the file leaves out keep their defaults.
        assert_eq!(config.deduplication.cache_size, 1_000_000);
        Ok(())
    });
}

#[test]
fn test_explicit_config_path_and_output_flag() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "custom.toml",
            r#"
                [filter]
                min_length = 6
                blocklist = ["internal.example"]
            "#,
        )?;

        let cli = Cli::parse_from([
            "certfeed",
            "--config",
            "custom.toml",
            "--output-file",
            "out/domains.txt",
            "--listen",
            "0.0.0.0:9100",
        ]);
        let config = Config::load(&cli).unwrap();

        assert_eq!(config.filter.min_length, 6);
        assert_eq!(config.filter.blocklist, vec!["internal.example"]);
        assert_eq!(config.output.file, Some(PathBuf::from("out/domains.txt")));
        assert_eq!(config.server.listen_address.port(), 9100);
        Ok(())
    });
}

#[test]
fn test_invalid_values_are_rejected() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "certfeed.toml",
            r#"
                [broadcast]
                queue_capacity = 0
            "#,
        )?;
        let err = Config::load(&Cli::parse_from(["certfeed"])).unwrap_err();
        assert!(err.to_string().contains("queue_capacity"));
        Ok(())
    });
}

#[test]
fn test_mistyped_values_name_the_file() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "certfeed.toml",
            r#"
                [polling]
                batch_size = "lots"
            "#,
        )?;
        let err = Config::load(&Cli::parse_from(["certfeed"])).unwrap_err();
        assert!(err.to_string().contains("certfeed.toml"));
        Ok(())
    });
}
