use std::sync::Arc;

use slotmap::SlotMap;

use crate::{
    command::{Command, CommandQueue, CommandQueueManager},
    error::{Error, Result},
    shader::{ShaderDesc, ShaderId},
    thread::RenderThread,
};

use super::{
    graph,
    history::{HistoryItem, Operation},
    ImageId, ImageType, Images,
};

/// Rebuilds every shader and image on a freshly restored context.
///
/// Anything queued but not yet flushed is dropped: it targeted the
/// lost context, and its effects are already part of the records
/// being replayed.
pub(crate) fn restore(
    images: &Images,
    shaders: &SlotMap<ShaderId, Arc<ShaderDesc>>,
    manager: &mut CommandQueueManager,
    thread: &RenderThread,
) -> Result<()> {
    let unresolved = images.unresolved_count();
    if unresolved > 0 {
        return Err(Error::UnresolvedImages { count: unresolved });
    }

    log::info!(
        "Restoring {} image(s) and {} shader(s)",
        images.entries.len(),
        shaders.len()
    );
    manager.discard_pending();
    thread.call(|backend| backend.restore_context())??;
    // Background flushes that ran against the lost context failed.
    manager.discard_errors(thread)?;
    let clear_screen = thread.call(|backend| backend.needs_clearing_screen())?;

    let queue = manager.queue();
    for (id, desc) in shaders {
        queue.enqueue(Command::NewShader {
            id,
            desc: Arc::clone(desc),
        });
    }

    for entry in images.entries.values() {
        queue.enqueue(Command::NewImage {
            id: entry.texture,
            size: entry.size,
            screen: entry.ty == ImageType::Screen,
        });
        let pixels = match entry.ty {
            ImageType::Regular => match entry.base.as_bytes() {
                Some(bytes) => Some(bytes.to_vec()),
                None => continue,
            },
            ImageType::Volatile => None,
            ImageType::Screen if clear_screen => None,
            ImageType::Screen => continue,
        };
        queue.enqueue(Command::ReplacePixels {
            dst: entry.texture,
            size: entry.size,
            pixels,
        });
    }

    let steps = graph::plan(&images.entries);
    for step in &steps {
        let mut items: Vec<(ImageId, &HistoryItem)> = step
            .images
            .iter()
            .flat_map(|&id| images.entries[id].history.iter().map(move |item| (id, item)))
            .collect();
        if step.cyclic {
            log::debug!("Interleaving the histories of {} image(s)", step.images.len());
            items.sort_by_key(|(_, item)| item.seq);
        }
        for (id, item) in items {
            replay(queue, images, id, item);
        }
    }

    manager.flush_sync(thread, false)?;
    log::info!("Restoration finished in {} step(s)", steps.len());
    Ok(())
}

fn replay(queue: &mut CommandQueue, images: &Images, id: ImageId, item: &HistoryItem) {
    let entry = &images.entries[id];
    log::trace!("Replaying operation {} on {}", item.seq, entry.texture);
    match &item.op {
        Operation::Write { region, pixels } => {
            queue.enqueue_write_pixels(entry.texture, *region, pixels.clone());
        }
        Operation::Draw(draw) => {
            let srcs = draw
                .srcs
                .map(|src| src.and_then(|src| images.entries.get(src)).map(|src| src.info()));
            queue.enqueue_draw_triangles(
                entry.info(),
                srcs,
                &draw.vertices,
                &draw.indices,
                draw.blend,
                draw.dst_region,
                draw.src_regions,
                &draw.shader,
                &draw.uniforms,
                draw.fill_rule,
            );
        }
    }
}
