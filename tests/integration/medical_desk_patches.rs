//! Integration tests for the medical-desk patch set.
//!
//! Runs `patches/medical-desk.toml` against a pre-patch App.tsx and checks
//! the result, then re-runs to confirm every patch is detected as applied.

use anchor_patcher::balance::{tally, Delimiter};
use anchor_patcher::config::{apply_patches, check_patches, load_from_path, PatchOutcome, RunOptions};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const FIXTURE: &str = include_str!("../fixtures/App.tsx");

fn patch_file() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("patches/medical-desk.toml")
}

fn setup_mock_client_workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("src")).unwrap();
    fs::write(dir.path().join("src/App.tsx"), FIXTURE).unwrap();
    dir
}

fn read_app(dir: &TempDir) -> String {
    fs::read_to_string(dir.path().join("src/App.tsx")).unwrap()
}

fn outcome_of<'a>(
    reports: &'a [anchor_patcher::config::PatchReport],
    id: &str,
) -> &'a PatchOutcome {
    &reports
        .iter()
        .find(|r| r.id == id)
        .unwrap_or_else(|| panic!("no report for {id}"))
        .outcome
}

#[test]
fn test_patch_set_loads_and_validates() {
    let config = load_from_path(patch_file()).unwrap();
    assert_eq!(config.meta.name, "medical-desk");

    let ids: Vec<&str> = config.patches.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(
        ids,
        [
            "add-imports",
            "add-states",
            "add-filtered-vars",
            "replace-protocol-grid",
            "fix-classname-template",
            "remove-duplicate-div",
            "add-modals",
        ]
    );
}

#[test]
fn test_fixture_is_unbalanced_before_patching() {
    // The stray </div> after the protocol grid
    assert_eq!(tally(FIXTURE).tags, -1);
}

#[test]
fn test_full_patch_set_applies() {
    let workspace = setup_mock_client_workspace();
    let config = load_from_path(patch_file()).unwrap();

    let reports = apply_patches(&config, workspace.path(), &RunOptions::default()).unwrap();
    for report in &reports {
        assert!(
            matches!(report.outcome, PatchOutcome::Applied { .. }),
            "{}: {}",
            report.id,
            report.outcome
        );
    }

    match outcome_of(&reports, "fix-classname-template") {
        PatchOutcome::Applied { replacements, .. } => assert_eq!(*replacements, 2),
        other => panic!("unexpected: {other}"),
    }
    match outcome_of(&reports, "remove-duplicate-div") {
        PatchOutcome::Applied { warnings, .. } => {
            assert!(warnings.iter().any(|w| w.delimiter == Delimiter::Tag));
        }
        other => panic!("unexpected: {other}"),
    }
    match outcome_of(&reports, "add-modals") {
        PatchOutcome::Applied { warnings, .. } => assert!(warnings.is_empty(), "{warnings:?}"),
        other => panic!("unexpected: {other}"),
    }

    let app = read_app(&workspace);

    // Imports directly after the API import
    assert!(app.contains(
        "import { fetchFromAPI, analyzeSymptoms } from './lib/api'\n\
         import { protocolosClinicosCompletos } from './data/protocolos'\n"
    ));

    // State declarations take the indentation of the symptom state
    assert!(app.contains(
        "  const [newSymptom, setNewSymptom] = useState('')\n\
         \x20 const [protocoloSelecionado, setProtocoloSelecionado] = useState<any>(null)\n"
    ));
    assert!(app.contains("  const [regiaoSelecionada, setRegiaoSelecionada] = useState(0)\n\n"));

    // Derived values after the tabs array, blank line preserved
    assert!(app.contains("  ]\n\n  const protocolosFiltrados = categoriaFiltro === 'todas'\n"));
    assert!(app.contains("    ? protocolosClinicosCompletos\n"));

    // Protocol grid rebuilt from the filtered list; other grids untouched
    assert!(app.contains(
        "              <div className=\"grid grid-cols-1 md:grid-cols-2 lg:grid-cols-3 gap-6\">\n\
         \x20               {protocolosFiltrados.map((protocolo, index) => (\n"
    ));
    assert!(!app.contains("{ nome: 'Dor Torácica', categoria: 'Cardiologia' }"));
    assert!(app.contains("{symptoms.map((symptom) => ("));
    assert!(app.contains("Em breve"));
    assert_eq!(
        app.matches("grid grid-cols-1 md:grid-cols-2 lg:grid-cols-3 gap-6").count(),
        3
    );

    // Template-literal classNames wrapped
    assert!(!app.contains("className=`"));
    assert!(app.contains(
        "<header className={`p-4 shadow ${darkMode ? 'bg-gray-800' : 'bg-white'}`}>"
    ));

    // Stray div gone
    assert!(app.contains("                ))}\n              </div>\n            </motion.div>\n"));

    // Modals between </main> and the root </div>
    assert!(app.contains("      </main>\n\n      {/* Modais */}\n      <AnimatePresence>\n"));
    assert!(app.ends_with("        )}\n      </AnimatePresence>\n    </div>\n  )\n}\n"));

    assert!(tally(&app).is_balanced(), "{:?}", tally(&app));
}

#[test]
fn test_second_run_is_a_noop() {
    let workspace = setup_mock_client_workspace();
    let config = load_from_path(patch_file()).unwrap();

    let first = apply_patches(&config, workspace.path(), &RunOptions::default()).unwrap();
    assert!(first.iter().all(|r| r.outcome.is_success()));
    let after_first = read_app(&workspace);

    let second = apply_patches(&config, workspace.path(), &RunOptions::default()).unwrap();
    for report in &second {
        assert_eq!(
            report.outcome,
            PatchOutcome::AlreadyApplied,
            "{} re-applied",
            report.id
        );
    }
    assert_eq!(read_app(&workspace), after_first);
}

#[test]
fn test_check_reports_pending_without_writing() {
    let workspace = setup_mock_client_workspace();
    let config = load_from_path(patch_file()).unwrap();

    let reports = check_patches(&config, workspace.path()).unwrap();
    assert_eq!(reports.len(), 7);
    assert!(reports
        .iter()
        .all(|r| matches!(r.outcome, PatchOutcome::Applied { .. })));
    assert_eq!(read_app(&workspace), FIXTURE);
}

#[test]
fn test_partially_patched_file_resumes() {
    let workspace = setup_mock_client_workspace();
    let config = load_from_path(patch_file()).unwrap();

    // Simulate an earlier run that stopped after the state declarations
    let mut partial = config.clone();
    partial.patches.truncate(2);
    apply_patches(&partial, workspace.path(), &RunOptions::default()).unwrap();

    let reports = apply_patches(&config, workspace.path(), &RunOptions::default()).unwrap();
    assert_eq!(outcome_of(&reports, "add-imports"), &PatchOutcome::AlreadyApplied);
    assert_eq!(outcome_of(&reports, "add-states"), &PatchOutcome::AlreadyApplied);
    assert!(matches!(
        outcome_of(&reports, "add-modals"),
        PatchOutcome::Applied { .. }
    ));
    assert_eq!(read_app(&workspace).matches("protocolosClinicosCompletos } from").count(), 1);
}

#[test]
fn test_drifted_markup_reports_not_found() {
    let workspace = setup_mock_client_workspace();
    let drifted = FIXTURE.replace("activeTab === 'protocolos'", "activeTab === 'library'");
    fs::write(workspace.path().join("src/App.tsx"), drifted).unwrap();

    let config = load_from_path(patch_file()).unwrap();
    let reports = apply_patches(&config, workspace.path(), &RunOptions::default()).unwrap();

    assert_eq!(
        outcome_of(&reports, "replace-protocol-grid"),
        &PatchOutcome::AnchorNotFound
    );
    // The stray div is still in the file, so the repair is not applied
    assert_eq!(
        outcome_of(&reports, "remove-duplicate-div"),
        &PatchOutcome::AnchorNotFound
    );
    assert!(matches!(
        outcome_of(&reports, "add-imports"),
        PatchOutcome::Applied { .. }
    ));
}

#[test]
fn test_repair_with_drifted_scope_is_not_reported_applied() {
    let workspace = setup_mock_client_workspace();
    let drifted = FIXTURE.replace("activeTab === 'cadeias'", "activeTab === 'chains'");
    fs::write(workspace.path().join("src/App.tsx"), &drifted).unwrap();

    let mut config = load_from_path(patch_file()).unwrap();
    config.patches.retain(|p| p.id == "remove-duplicate-div");

    let reports = apply_patches(&config, workspace.path(), &RunOptions::default()).unwrap();
    assert_eq!(reports[0].outcome, PatchOutcome::AnchorNotFound);
    assert_eq!(read_app(&workspace), drifted);
    assert_eq!(tally(&drifted).tags, -1);
}

#[test]
fn test_repair_alone_removes_stray_div() {
    let workspace = setup_mock_client_workspace();

    let mut config = load_from_path(patch_file()).unwrap();
    config.patches.retain(|p| p.id == "remove-duplicate-div");

    let reports = apply_patches(&config, workspace.path(), &RunOptions::default()).unwrap();
    assert!(matches!(reports[0].outcome, PatchOutcome::Applied { .. }));
    let app = read_app(&workspace);
    assert_eq!(tally(&app).tags, 0);

    let reports = apply_patches(&config, workspace.path(), &RunOptions::default()).unwrap();
    assert_eq!(reports[0].outcome, PatchOutcome::AlreadyApplied);
    assert_eq!(read_app(&workspace), app);
}
