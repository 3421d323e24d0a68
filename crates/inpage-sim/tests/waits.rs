//! DOM waits, plugin lookup, theme switching and the small helpers.

use std::sync::Arc;
use std::time::Duration;

use inpage::host::{CellView, Dom, NotebookPanel, Service};
use inpage::waiter::SelectorWaitOptions;
use inpage::{with_deadline, AgentError, CellType, HostError, InPageAgent, THEME_ATTRIBUTE};
use inpage_sim::dom::SimElement;
use inpage_sim::host::THEME_APPLY_DELAY;
use inpage_sim::{NotebookDoc, SimHost, SimNotebook, SimPlugin};
use tokio::time::{sleep, Instant};

const SHOWN: SelectorWaitOptions = SelectorWaitOptions { hidden: false };
const HIDDEN: SelectorWaitOptions = SelectorWaitOptions { hidden: true };

fn setup() -> (Arc<SimHost>, Arc<SimNotebook>, InPageAgent) {
    let host = Arc::new(SimHost::new());
    let notebook = SimNotebook::with_cells(&[(CellType::Code, "a"), (CellType::Markdown, "# b")]);
    host.set_active_notebook(Some(notebook.clone()));
    let agent = InPageAgent::with_defaults(host.clone());
    (host, notebook, agent)
}

/// Append `<div class="{class}">` to the body after `delay`.
fn append_later(host: &Arc<SimHost>, class: &str, delay: Duration) -> Arc<SimElement> {
    let element = SimElement::with_classes("div", &[class]);
    let body = host.sim_dom().body_element().clone();
    let child = element.clone();
    tokio::spawn(async move {
        sleep(delay).await;
        body.append_child(child);
    });
    element
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_selector_resolves_when_element_appears() {
    let (host, _notebook, agent) = setup();
    append_later(&host, "jp-Dialog", Duration::from_millis(500));

    let start = Instant::now();
    let found = agent.wait_for_selector(".jp-Dialog", None, SHOWN).await.unwrap();

    assert!(found.is_some());
    assert!(start.elapsed() >= Duration::from_millis(500));
    assert!(start.elapsed() <= Duration::from_millis(600));
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_selector_checks_after_first_interval() {
    let (_host, _notebook, agent) = setup();

    let start = Instant::now();
    let found = agent.wait_for_selector(".jp-Notebook", None, SHOWN).await.unwrap();

    assert_eq!(found.unwrap().tag_name(), "DIV");
    assert_eq!(start.elapsed(), Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_selector_hidden() {
    let (host, _notebook, agent) = setup();
    let spinner = SimElement::with_classes("div", &["jp-Spinner"]);
    host.sim_dom().body_element().append_child(spinner.clone());

    let body = host.sim_dom().body_element().clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(700)).await;
        body.remove_child(&spinner);
    });

    let start = Instant::now();
    let found = agent.wait_for_selector(".jp-Spinner", None, HIDDEN).await.unwrap();

    assert!(found.is_none());
    assert!(start.elapsed() >= Duration::from_millis(700));
    assert!(start.elapsed() <= Duration::from_millis(800));
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_selector_hidden_when_never_present() {
    let (_host, _notebook, agent) = setup();

    let start = Instant::now();
    assert!(agent
        .wait_for_selector(".jp-Spinner", None, HIDDEN)
        .await
        .unwrap()
        .is_none());
    assert_eq!(start.elapsed(), Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_selector_under_root() {
    let (host, notebook, agent) = setup();
    let cell_node = notebook.cell(0).unwrap().node();
    // outside the cell: must not satisfy the scoped wait
    append_later(&host, "jp-InputPrompt", Duration::ZERO);

    let found = agent
        .wait_for_selector(".jp-InputPrompt", Some(&cell_node), SHOWN)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(found.text_content(), "[ ]:");
    let markdown_node = notebook.cell(1).unwrap().node();
    let missing = with_deadline(
        Duration::from_secs(1),
        agent.wait_for_selector(".jp-OutputArea-output", Some(&markdown_node), SHOWN),
    )
    .await;
    assert!(matches!(missing, Err(AgentError::Timeout(_))));
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_xpath() {
    let (_host, _notebook, agent) = setup();

    let found = agent
        .wait_for_xpath("//div[@data-jp-item-name='run']", None, SHOWN)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.attribute("data-jp-item-name").as_deref(), Some("run"));

    let gone = agent
        .wait_for_xpath("//div[contains(@class, 'jp-Dialog')]", None, HIDDEN)
        .await
        .unwrap();
    assert!(gone.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_selector_never_matching_is_bounded_by_deadline() {
    let (_host, _notebook, agent) = setup();

    let result = with_deadline(
        Duration::from_secs(2),
        agent.wait_for_selector(".never-there", None, SHOWN),
    )
    .await;

    assert!(matches!(result, Err(AgentError::Timeout(d)) if d == Duration::from_secs(2)));
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_invalid_selector_rejects() {
    let (_host, _notebook, agent) = setup();

    // hidden mode must not mistake a bad selector for a vanished element
    let hidden = with_deadline(
        Duration::from_secs(5),
        agent.wait_for_selector("div[", None, HIDDEN),
    )
    .await
    .unwrap();
    assert!(matches!(
        hidden,
        Err(AgentError::Host(HostError::InvalidQuery { .. }))
    ));

    let start = Instant::now();
    let shown = with_deadline(
        Duration::from_secs(5),
        agent.wait_for_selector("div[", None, SHOWN),
    )
    .await
    .unwrap();
    assert!(matches!(
        shown,
        Err(AgentError::Host(HostError::InvalidQuery { .. }))
    ));
    assert_eq!(start.elapsed(), Duration::from_millis(200));

    let xpath = with_deadline(
        Duration::from_secs(5),
        agent.wait_for_xpath("//div[", None, HIDDEN),
    )
    .await
    .unwrap();
    assert!(xpath.is_err());
}

fn service(name: &str) -> Service {
    Arc::new(name.to_string())
}

#[tokio::test(start_paused = true)]
async fn test_get_plugin_activated() {
    let (host, _notebook, agent) = setup();
    host.sim_plugins()
        .register("app:shell", SimPlugin::activated(Some(service("shell"))));

    let shell = agent.get_plugin_as::<String>("app:shell").await.unwrap();

    assert_eq!(shell.as_str(), "shell");
    assert!(host.sim_plugins().activations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_get_plugin_activates_first() {
    let (host, _notebook, agent) = setup();
    host.sim_plugins().register(
        "app:themes",
        SimPlugin::deferred(Some(service("themes"))).activation_delay(Duration::from_millis(300)),
    );

    let start = Instant::now();
    let themes = agent.get_plugin_as::<String>("app:themes").await.unwrap();

    assert_eq!(themes.as_str(), "themes");
    assert_eq!(start.elapsed(), Duration::from_millis(300));
    assert_eq!(host.sim_plugins().activations(), vec!["app:themes"]);

    // second lookup finds it active
    agent.get_plugin("app:themes").await.unwrap();
    assert_eq!(host.sim_plugins().activations().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_get_plugin_ignores_activation_failure() {
    let (host, _notebook, agent) = setup();
    host.sim_plugins().register(
        "app:broken",
        SimPlugin::deferred(Some(service("broken"))).failing(),
    );

    let broken = agent.get_plugin_as::<String>("app:broken").await;

    assert_eq!(broken.as_deref().map(String::as_str), Some("broken"));
    assert_eq!(host.sim_plugins().activations(), vec!["app:broken"]);
}

#[tokio::test(start_paused = true)]
async fn test_get_plugin_without_service() {
    let (host, _notebook, agent) = setup();
    host.sim_plugins()
        .register("app:headless", SimPlugin::deferred(None));

    assert!(agent.get_plugin("app:headless").await.is_none());
    assert!(agent.get_plugin_as::<u32>("app:headless").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_get_plugin_wrong_type_is_none() {
    let (host, _notebook, agent) = setup();
    host.sim_plugins()
        .register("app:shell", SimPlugin::activated(Some(service("shell"))));

    assert!(agent.get_plugin_as::<u32>("app:shell").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_get_plugin_unregistered_stays_pending() {
    let (_host, _notebook, agent) = setup();

    let result = with_deadline(Duration::from_secs(5), agent.get_plugin("app:missing")).await;

    assert!(matches!(result, Err(AgentError::Timeout(_))));
}

#[tokio::test(start_paused = true)]
async fn test_set_theme_waits_for_body_attribute() {
    let (host, _notebook, agent) = setup();
    let body = host.sim_dom().body();
    assert_eq!(
        body.attribute(THEME_ATTRIBUTE).as_deref(),
        Some("JupyterLab Light")
    );

    let start = Instant::now();
    agent.set_theme("JupyterLab Dark").await.unwrap();

    assert!(start.elapsed() >= THEME_APPLY_DELAY);
    assert_eq!(
        body.attribute(THEME_ATTRIBUTE).as_deref(),
        Some("JupyterLab Dark")
    );
}

#[tokio::test(start_paused = true)]
async fn test_set_unknown_theme_fails() {
    let (_host, _notebook, agent) = setup();

    let result = agent.set_theme("Solarized").await;

    assert!(matches!(
        result,
        Err(AgentError::Host(HostError::Command { .. }))
    ));
}

#[tokio::test]
async fn test_toolbar_lookup() {
    let (_host, _notebook, agent) = setup();

    assert_eq!(agent.get_notebook_toolbar_item_index("save"), Some(0));
    assert_eq!(agent.get_notebook_toolbar_item_index("run"), Some(5));
    assert_eq!(agent.get_notebook_toolbar_item_index("nope"), None);

    let item = agent.get_notebook_toolbar_item("kernelName").unwrap();
    assert_eq!(
        item.attribute("data-jp-item-name").as_deref(),
        Some("kernelName")
    );
}

#[tokio::test]
async fn test_element_visibility() {
    let (host, notebook, agent) = setup();
    let cell = notebook.cell_view(0).unwrap();
    let node = cell.node();
    assert!(agent.is_element_visible(node.as_ref()));

    cell.element().hide();
    assert!(!agent.is_element_visible(node.as_ref()));

    // no box but a client rect still counts
    cell.element().set_client_rects(1);
    assert!(agent.is_element_visible(node.as_ref()));

    let detached = SimElement::new("span");
    host.sim_dom().body_element().append_child(detached.clone());
    assert!(!agent.is_element_visible(&*detached));
}

#[tokio::test]
async fn test_save_active_notebook() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("saved.automerge");
    let host = Arc::new(SimHost::new().with_save_path(path.clone()));
    host.set_active_notebook(Some(SimNotebook::with_cells(&[(CellType::Code, "x = 1")])));
    let agent = InPageAgent::with_defaults(host.clone());

    assert!(agent.save_active_notebook().await.unwrap());

    let saved = NotebookDoc::open(&path).unwrap();
    assert_eq!(saved.get_cells()[0].source, "x = 1");
}

#[tokio::test]
async fn test_save_without_path_or_notebook() {
    let (_host, _notebook, agent) = setup();
    assert!(matches!(
        agent.save_active_notebook().await,
        Err(AgentError::Host(HostError::Command { .. }))
    ));

    let agent = InPageAgent::with_defaults(Arc::new(SimHost::new()));
    assert!(!agent.save_active_notebook().await.unwrap());
}
