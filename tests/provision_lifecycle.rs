//! Provision-then-teardown behaviour driven through the library with a
//! scripted engine.

#[path = "common/fixtures.rs"]
mod fixtures;

use fixtures::{ADDRESS, PRIVATE_KEY, Utf8TempDir, utf8_tempdir};
use powervs_vm::engine::STATE_FILE;
use powervs_vm::params::USER_DATA_VAR;
use powervs_vm::test_support::{ScriptedRunner, tfstate_with_outputs};
use powervs_vm::{
    AccessInstaller, DEFAULT_TOFU_BIN, Engine, ProvisionOrchestrator, ProvisioningParameters,
    StateStore, TeardownDriver, TeardownOutcome,
};
use rstest::{fixture, rstest};

struct Workspace {
    work: Utf8TempDir,
    home: Utf8TempDir,
}

impl Workspace {
    fn store(&self) -> StateStore {
        StateStore::in_dir(&self.work.path)
    }

    fn orchestrator(&self, runner: &ScriptedRunner) -> ProvisionOrchestrator<ScriptedRunner> {
        ProvisionOrchestrator::new(
            Engine::new(DEFAULT_TOFU_BIN, runner.clone()),
            AccessInstaller::with_home(self.home.path.clone()),
            self.store(),
        )
    }
}

#[fixture]
fn workspace() -> Workspace {
    Workspace {
        work: utf8_tempdir(),
        home: utf8_tempdir(),
    }
}

fn params(user_data: Option<&str>) -> ProvisioningParameters {
    ProvisioningParameters::builder()
        .api_key("k1")
        .zone("lon04")
        .prefix("ci-test")
        .os_image_name("RHEL9-SP2")
        .server_type("s922")
        .number_of_processors("2")
        .memory_size("4")
        .user_data(user_data.map(str::to_owned))
        .build()
        .expect("parameters should be valid")
}

fn script_successful_create(runner: &ScriptedRunner) {
    runner.push_success();
    runner.push_success();
    runner.push_success_writing(STATE_FILE, &tfstate_with_outputs(Some(ADDRESS), Some(PRIVATE_KEY)));
}

#[rstest]
#[case::without_user_data(None)]
#[case::with_user_data(Some("#cloud-config\npackages: [git]\n"))]
fn teardown_replays_the_creation_variables(
    workspace: Workspace,
    #[case] user_data: Option<&str>,
) {
    let create_runner = ScriptedRunner::new();
    script_successful_create(&create_runner);
    workspace
        .orchestrator(&create_runner)
        .execute(&params(user_data), &workspace.work.path)
        .expect("provision should succeed");

    // Teardown runs later with nothing but the record on disk.
    let destroy_runner = ScriptedRunner::new();
    destroy_runner.push_success();
    let outcome = TeardownDriver::new(Engine::new(DEFAULT_TOFU_BIN, destroy_runner.clone()))
        .teardown(&workspace.store());

    assert_eq!(
        outcome,
        TeardownOutcome::Destroyed {
            working_directory: workspace.work.path.clone()
        }
    );
    let create_calls = create_runner.invocations();
    let plan = create_calls
        .iter()
        .find(|call| call.command_string().starts_with("tofu plan "))
        .expect("plan should have run");
    let destroy_calls = destroy_runner.invocations();
    let [destroy] = destroy_calls.as_slice() else {
        panic!("expected one destroy call, got {destroy_calls:?}");
    };
    assert_eq!(destroy.var_assignments(), plan.var_assignments());
    assert_eq!(destroy.dir, workspace.work.path);
    let expected_vars = if user_data.is_some() { 8 } else { 7 };
    assert_eq!(destroy.var_assignments().len(), expected_vars);
    assert_eq!(
        destroy
            .var_assignments()
            .iter()
            .any(|arg| arg.starts_with(&format!("-var={USER_DATA_VAR}="))),
        user_data.is_some()
    );
    assert!(!workspace.store().path().exists());
}

#[rstest]
fn second_teardown_is_a_no_op(workspace: Workspace) {
    let create_runner = ScriptedRunner::new();
    script_successful_create(&create_runner);
    workspace
        .orchestrator(&create_runner)
        .execute(&params(None), &workspace.work.path)
        .expect("provision should succeed");

    let destroy_runner = ScriptedRunner::new();
    destroy_runner.push_success();
    let driver = TeardownDriver::new(Engine::new(DEFAULT_TOFU_BIN, destroy_runner.clone()));
    let first = driver.teardown(&workspace.store());
    let second = driver.teardown(&workspace.store());

    assert!(matches!(first, TeardownOutcome::Destroyed { .. }));
    assert_eq!(second, TeardownOutcome::NothingToCleanUp);
    assert_eq!(destroy_runner.invocations().len(), 1);
}

#[rstest]
fn failed_apply_leaves_nothing_to_clean_up(workspace: Workspace) {
    let create_runner = ScriptedRunner::new();
    create_runner.push_success();
    create_runner.push_success();
    create_runner.push_failure(1);

    workspace
        .orchestrator(&create_runner)
        .execute(&params(None), &workspace.work.path)
        .expect_err("apply failure should abort provisioning");

    let destroy_runner = ScriptedRunner::new();
    let outcome = TeardownDriver::new(Engine::new(DEFAULT_TOFU_BIN, destroy_runner.clone()))
        .teardown(&workspace.store());

    assert_eq!(outcome, TeardownOutcome::NothingToCleanUp);
    assert!(destroy_runner.invocations().is_empty());
    assert!(!workspace.home.path.join(".ssh").exists());
}

#[rstest]
fn missing_output_still_allows_teardown(workspace: Workspace) {
    let create_runner = ScriptedRunner::new();
    create_runner.push_success();
    create_runner.push_success();
    create_runner.push_success_writing(STATE_FILE, &tfstate_with_outputs(Some(ADDRESS), None));

    let err = workspace
        .orchestrator(&create_runner)
        .execute(&params(None), &workspace.work.path)
        .expect_err("missing private key should abort provisioning");
    assert!(err.to_string().contains("private_key_openssh"), "{err}");

    let destroy_runner = ScriptedRunner::new();
    destroy_runner.push_success();
    let outcome = TeardownDriver::new(Engine::new(DEFAULT_TOFU_BIN, destroy_runner))
        .teardown(&workspace.store());

    assert!(matches!(outcome, TeardownOutcome::Destroyed { .. }));
}
