use std::path::{Path, PathBuf};

use notify::event::ModifyKind;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

/// Watches `root` recursively and forwards every written or created path.
/// The returned watcher stops forwarding once dropped.
pub fn setup_watcher(
    root: &Path,
    touches: UnboundedSender<PathBuf>,
) -> Result<RecommendedWatcher, notify::Error> {
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if !is_relevant_event(&event) {
                    return;
                }
                for path in event.paths {
                    let _ = touches.send(path);
                }
            }
            Err(err) => warn!("watch error: {}", err),
        },
        NotifyConfig::default(),
    )?;

    watcher.watch(root, RecursiveMode::Recursive)?;
    info!("Watching {} for changes", root.display());
    Ok(watcher)
}

fn is_relevant_event(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_)
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Name(_))
            | EventKind::Modify(ModifyKind::Any)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind};

    #[test]
    fn only_content_changes_are_relevant() {
        let relevant = [
            EventKind::Create(CreateKind::File),
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            EventKind::Modify(ModifyKind::Any),
        ];
        for kind in relevant {
            assert!(is_relevant_event(&Event::new(kind)), "{:?}", kind);
        }

        let ignored = [
            EventKind::Remove(RemoveKind::File),
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
            EventKind::Access(notify::event::AccessKind::Any),
        ];
        for kind in ignored {
            assert!(!is_relevant_event(&Event::new(kind)), "{:?}", kind);
        }
    }
}
