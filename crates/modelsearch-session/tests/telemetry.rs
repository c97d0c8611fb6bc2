//! 全局 Subscriber 只能安装一次，因此全部断言放在同一个测试进程的单个用例中。

use modelsearch_session::telemetry::{self, TelemetryError};

#[test]
fn install_validates_filter_and_runs_once() {
    let err = telemetry::install("modelsearch_session=bogus").expect_err("invalid filter");
    assert!(matches!(err, TelemetryError::InvalidFilter { ref filter, .. } if filter == "modelsearch_session=bogus"));

    telemetry::install("modelsearch_session=debug,modelsearch_transport=info").expect("install");
    tracing::info!("telemetry installed");

    assert!(matches!(
        telemetry::install("info"),
        Err(TelemetryError::AlreadyInstalled)
    ));
    assert!(matches!(
        telemetry::install_from_env(),
        Err(TelemetryError::AlreadyInstalled)
    ));
}
