use glam::uvec2;

use super::{graph, Hint, ImageState, ImageType};
use crate::{
    backend::{software::SoftwareBackend, BackendError, Blend},
    graphics::{quad_indices, quad_vertices},
    shader::{Program, ShaderDesc, ShaderUnit},
    Context, DrawTriangles, Error, Image, Rect,
};

const WHITE: [u8; 4] = [0xff; 4];
const RED: [u8; 4] = [0xff, 0, 0, 0xff];
const BLUE: [u8; 4] = [0, 0, 0xff, 0xff];

fn context() -> Context {
    let _ = simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Warn)
        .init();
    Context::builder(SoftwareBackend::new())
        .vsync(false)
        .build()
        .unwrap()
}

fn with_software<R: Send + 'static>(
    cx: &Context,
    f: impl FnOnce(&mut SoftwareBackend) -> R + Send + 'static,
) -> R {
    cx.run_on_render_thread(move |backend| {
        f(backend
            .as_any_mut()
            .downcast_mut::<SoftwareBackend>()
            .unwrap())
    })
    .unwrap()
}

/// Ends the frame, drops every texture, and restores.
fn lose_and_restore(cx: &Context) {
    cx.end_frame().unwrap();
    with_software(cx, SoftwareBackend::lose_context);
    assert!(cx.restore_if_needed().unwrap());
}

fn gpu_pixels(cx: &Context, image: &Image) -> Vec<u8> {
    let texture = image.texture();
    with_software(cx, move |backend| backend.pixels(texture).unwrap().to_vec())
}

fn read(image: &Image, region: Rect) -> Vec<u8> {
    let mut pixels = vec![0; region.area() * 4];
    image.read_pixels(&mut pixels, region).unwrap();
    pixels
}

fn solid(color: [u8; 4], count: usize) -> Vec<u8> {
    color.iter().copied().cycle().take(count * 4).collect()
}

/// An image `pattern.len()` pixels wide, white where the pattern has `*`.
fn pattern_image(cx: &Context, pattern: &str) -> Image {
    let pixels: Vec<u8> = pattern
        .chars()
        .flat_map(|c| if c == '*' { WHITE } else { [0; 4] })
        .collect();
    cx.new_image_with_pixels(pattern.len() as u32, 1, &pixels)
}

fn assert_pattern(pixels: &[u8], pattern: &str) {
    for (i, c) in pattern.chars().enumerate() {
        let want = if c == '*' { WHITE } else { [0; 4] };
        assert_eq!(pixels[i * 4..i * 4 + 4], want, "pixel {} of {:?}", i, pattern);
    }
}

/// Draws all of `src` into `dst` at `(x, y)`.
fn draw(cx: &Context, dst: &Image, src: &Image, x: u32, y: u32) {
    draw_with(cx, dst, src, x, y, Blend::SOURCE_OVER, Hint::None);
}

fn draw_with(cx: &Context, dst: &Image, src: &Image, x: u32, y: u32, blend: Blend, hint: Hint) {
    let size = src.size();
    let vertices = quad_vertices(
        Rect::from_xywh(x, y, size.x, size.y),
        Rect::from_size(size),
        [1.; 4],
    );
    dst.draw_triangles(
        DrawTriangles::new(cx.nearest_filter_shader(), &vertices, &quad_indices())
            .source(0, src)
            .blend(blend)
            .hint(hint),
    );
}

#[test]
fn restores_written_pixels() {
    let cx = context();
    let image = cx.new_image(1, 1, ImageType::Regular);
    image.write_pixels(&RED, Rect::from_xywh(0, 0, 1, 1));
    lose_and_restore(&cx);
    assert_eq!(gpu_pixels(&cx, &image), RED);
}

#[test]
fn untouched_images_restore_as_transparent() {
    let cx = context();
    let blank = cx.new_image(16, 16, ImageType::Regular);
    let seeded = cx.new_image_with_pixels(2, 2, &solid(BLUE, 4));
    assert_eq!(blank.state(), ImageState::Fresh);
    assert_eq!(seeded.state(), ImageState::HasBasePixels);

    lose_and_restore(&cx);
    assert!(gpu_pixels(&cx, &blank).iter().all(|&b| b == 0));
    assert_eq!(gpu_pixels(&cx, &seeded), solid(BLUE, 4));
}

#[test]
fn restores_a_chain_of_draws() {
    let cx = context();
    let images: Vec<Image> = (0..8).map(|_| cx.new_image(1, 1, ImageType::Regular)).collect();
    images[0].write_pixels(&RED, Rect::from_xywh(0, 0, 1, 1));
    for pair in images.windows(2) {
        draw_with(&cx, &pair[1], &pair[0], 0, 0, Blend::COPY, Hint::None);
    }

    lose_and_restore(&cx);
    for image in &images {
        assert_eq!(gpu_pixels(&cx, image), RED);
    }
}

#[test]
fn reader_keeps_contents_of_an_overwritten_source() {
    let cx = context();
    let full = Rect::from_xywh(0, 0, 1, 1);
    let src = cx.new_image(1, 1, ImageType::Regular);
    src.write_pixels(&RED, full);
    let before = cx.new_image(1, 1, ImageType::Regular);
    draw_with(&cx, &before, &src, 0, 0, Blend::COPY, Hint::None);
    src.write_pixels(&BLUE, full);
    let after = cx.new_image(1, 1, ImageType::Regular);
    draw_with(&cx, &after, &src, 0, 0, Blend::COPY, Hint::None);

    // The first reader saw pixels that no longer exist anywhere on the CPU.
    assert_eq!(before.stale_regions(), vec![full]);
    assert_eq!(before.history_len(), 0);

    lose_and_restore(&cx);
    assert_eq!(before.state(), ImageState::HasBasePixels);
    assert_eq!(gpu_pixels(&cx, &src), BLUE);
    assert_eq!(gpu_pixels(&cx, &before), RED);
    assert_eq!(gpu_pixels(&cx, &after), BLUE);
}

#[test]
fn restores_a_complex_graph() {
    let cx = context();
    let img0 = pattern_image(&cx, "*---");
    let img1 = pattern_image(&cx, "*---");
    let img2 = pattern_image(&cx, "*---");
    let img3 = cx.new_image(4, 1, ImageType::Regular);
    let img4 = cx.new_image(4, 1, ImageType::Regular);
    let img5 = cx.new_image(4, 1, ImageType::Regular);
    let img6 = cx.new_image(4, 1, ImageType::Regular);
    let img7 = cx.new_image(4, 1, ImageType::Regular);

    draw(&cx, &img3, &img0, 0, 0);
    draw(&cx, &img3, &img1, 1, 0);
    draw(&cx, &img4, &img1, 1, 0);
    draw(&cx, &img4, &img2, 2, 0);
    draw(&cx, &img5, &img3, 0, 0);
    draw(&cx, &img6, &img3, 0, 0);
    draw(&cx, &img6, &img4, 1, 0);
    draw(&cx, &img7, &img2, 0, 0);
    draw(&cx, &img7, &img3, 2, 0);

    lose_and_restore(&cx);
    for (image, pattern) in [
        (&img0, "*---"),
        (&img1, "*---"),
        (&img2, "*---"),
        (&img3, "**--"),
        (&img4, "-**-"),
        (&img5, "**--"),
        (&img6, "****"),
        (&img7, "*-**"),
    ] {
        assert_pattern(&gpu_pixels(&cx, image), pattern);
    }
}

#[test]
fn restores_mutually_dependent_images() {
    let cx = context();
    let img0 = pattern_image(&cx, "*---");
    let img1 = cx.new_image(4, 1, ImageType::Regular);
    draw(&cx, &img1, &img0, 1, 0);
    draw(&cx, &img0, &img1, 1, 0);

    {
        let state = cx.state();
        let steps = graph::plan(&state.images.entries);
        assert_eq!(steps.len(), 1);
        assert!(steps[0].cyclic);
        assert_eq!(steps[0].images.len(), 2);
    }

    lose_and_restore(&cx);
    assert_pattern(&gpu_pixels(&cx, &img0), "*-*-");
    assert_pattern(&gpu_pixels(&cx, &img1), "-*--");
}

#[test]
fn restores_an_image_drawn_onto_itself() {
    let cx = context();
    let image = pattern_image(&cx, "*---");
    draw(&cx, &image, &image, 1, 0);
    draw(&cx, &image, &image, 2, 0);
    assert_eq!(image.history_len(), 2);

    lose_and_restore(&cx);
    assert_pattern(&gpu_pixels(&cx, &image), "****");
}

#[test]
fn source_written_after_a_read_replays_in_order() {
    let cx = context();
    let src = pattern_image(&cx, "****");
    let dst = cx.new_image(4, 1, ImageType::Regular);
    draw(&cx, &dst, &src, 0, 0);
    // A reader exists, so the partial write is recorded instead of
    // being folded into the base pixels.
    src.clear_pixels(Rect::from_xywh(0, 0, 2, 1));
    assert_eq!(src.history_len(), 1);
    assert_eq!(src.state(), ImageState::Stale);

    lose_and_restore(&cx);
    assert_pattern(&gpu_pixels(&cx, &dst), "****");
    assert_pattern(&gpu_pixels(&cx, &src), "--**");
}

#[test]
fn partial_writes_update_the_base_pixels() {
    let cx = context();
    let image = cx.new_image(4, 4, ImageType::Regular);
    let pixels: Vec<u8> = (0..16).collect();
    image.write_pixels(&pixels, Rect::from_xywh(1, 1, 2, 2));
    image.write_pixels(&pixels, Rect::from_xywh(2, 2, 2, 2));
    assert_eq!(image.state(), ImageState::HasBasePixels);
    assert_eq!(image.history_len(), 0);

    let full = Rect::from_xywh(0, 0, 4, 4);
    let expected = read(&image, full);
    assert_eq!(read(&image, Rect::from_xywh(2, 2, 2, 2)), pixels);
    // Pixel (1, 1) comes from the first write.
    assert_eq!(expected[20..24], pixels[..4]);

    lose_and_restore(&cx);
    assert_eq!(gpu_pixels(&cx, &image), expected);
}

#[test]
fn many_single_pixel_writes_restore() {
    let cx = context();
    let image = cx.new_image(8, 8, ImageType::Regular);
    for y in 0..8 {
        for x in 0..8 {
            let color = [x as u8 * 10, y as u8 * 10, 0, 0xff];
            image.write_pixels(&color, Rect::from_xywh(x, y, 1, 1));
        }
    }
    let copy = cx.new_image(8, 8, ImageType::Regular);
    draw_with(&cx, &copy, &image, 0, 0, Blend::COPY, Hint::None);

    let expected = read(&image, Rect::from_xywh(0, 0, 8, 8));
    assert_eq!(expected[4 * (3 * 8 + 5)..][..4], [50, 30, 0, 0xff]);

    lose_and_restore(&cx);
    assert_eq!(gpu_pixels(&cx, &image), expected);
    assert_eq!(gpu_pixels(&cx, &copy), expected);
}

#[test]
fn whole_image_write_replaces_the_history() {
    let cx = context();
    let full = Rect::from_xywh(0, 0, 1, 1);
    let src = cx.new_image_with_pixels(1, 1, &RED);
    let image = cx.new_image(1, 1, ImageType::Regular);
    draw(&cx, &image, &src, 0, 0);
    assert_eq!(image.history_len(), 1);

    image.write_pixels(&BLUE, full);
    assert_eq!(image.history_len(), 0);
    assert_eq!(image.state(), ImageState::HasBasePixels);

    lose_and_restore(&cx);
    assert_eq!(gpu_pixels(&cx, &image), BLUE);
}

#[test]
fn disposed_source_is_resolved_at_the_frame_boundary() {
    let cx = context();
    let src = cx.new_image_with_pixels(1, 1, &RED);
    let image = cx.new_image(1, 1, ImageType::Regular);
    draw(&cx, &image, &src, 0, 0);
    src.dispose();
    assert_eq!(image.stale_regions(), vec![Rect::from_xywh(0, 0, 1, 1)]);

    lose_and_restore(&cx);
    assert_eq!(gpu_pixels(&cx, &image), RED);
}

#[test]
fn restoring_with_unresolved_images_fails() {
    let cx = context();
    let src = cx.new_image_with_pixels(1, 1, &RED);
    let image = cx.new_image(1, 1, ImageType::Regular);
    draw(&cx, &image, &src, 0, 0);
    drop(src);

    cx.flush(true).unwrap();
    with_software(&cx, SoftwareBackend::lose_context);
    assert!(matches!(
        cx.restore_if_needed(),
        Err(Error::UnresolvedImages { count: 1 })
    ));
    drop(image);
}

#[test]
fn volatile_images_read_from_the_gpu_and_restore_cleared() {
    let cx = context();
    let image = cx.new_image(1, 1, ImageType::Volatile);
    image.write_pixels(&RED, Rect::from_xywh(0, 0, 1, 1));
    assert_eq!(image.state(), ImageState::Fresh);
    assert_eq!(read(&image, Rect::from_xywh(0, 0, 1, 1)), RED);

    lose_and_restore(&cx);
    assert_eq!(gpu_pixels(&cx, &image), [0; 4]);
}

#[test]
fn drawing_from_a_volatile_image_needs_a_readback() {
    let cx = context();
    let volatile = cx.new_image(1, 1, ImageType::Volatile);
    volatile.write_pixels(&RED, Rect::from_xywh(0, 0, 1, 1));
    let image = cx.new_image(1, 1, ImageType::Regular);
    draw(&cx, &image, &volatile, 0, 0);
    assert_eq!(image.state(), ImageState::Stale);
    assert_eq!(image.history_len(), 0);

    lose_and_restore(&cx);
    assert_eq!(gpu_pixels(&cx, &image), RED);
}

#[test]
fn partial_write_after_a_draw_is_recorded() {
    let cx = context();
    let src = pattern_image(&cx, "****");
    let image = cx.new_image(4, 1, ImageType::Regular);
    draw(&cx, &image, &src, 0, 0);
    image.write_pixels(&solid(RED, 2), Rect::from_xywh(1, 0, 2, 1));
    assert_eq!(image.history_len(), 2);

    let expected = [WHITE, RED, RED, WHITE].concat();
    lose_and_restore(&cx);
    assert_eq!(gpu_pixels(&cx, &image), expected);
    // Reading a stale region resolves the image.
    assert_eq!(read(&image, Rect::from_xywh(1, 0, 1, 1)), RED);
    assert_eq!(image.state(), ImageState::HasBasePixels);
}

#[test]
fn rewriting_a_region_drops_the_earlier_write() {
    let cx = context();
    let image = pattern_image(&cx, "----");
    let reader = cx.new_image(4, 1, ImageType::Regular);
    draw(&cx, &reader, &image, 0, 0);

    let region = Rect::from_xywh(1, 0, 2, 1);
    image.write_pixels(&solid(RED, 2), region);
    image.write_pixels(&solid(BLUE, 2), region);
    assert_eq!(image.history_len(), 1);
    assert_eq!(reader.state(), ImageState::Stale);
    assert_eq!(reader.history_len(), 1);

    lose_and_restore(&cx);
    assert_eq!(
        gpu_pixels(&cx, &image),
        [[0; 4], BLUE, BLUE, [0; 4]].concat()
    );
    assert_pattern(&gpu_pixels(&cx, &reader), "----");
}

#[test]
fn extend_keeps_contents() {
    let cx = context();
    let mut image = cx.new_image_with_pixels(1, 1, &RED);
    let old_texture = image.texture();
    image.extend(2, 2);
    assert_eq!(image.size(), uvec2(2, 2));
    assert_ne!(image.texture(), old_texture);

    let mut expected = solid([0; 4], 4);
    expected[..4].copy_from_slice(&RED);
    assert_eq!(read(&image, Rect::from_xywh(0, 0, 2, 2)), expected);
    assert_eq!(gpu_pixels(&cx, &image), expected);
    with_software(&cx, move |backend| assert!(!backend.has_texture(old_texture)));

    lose_and_restore(&cx);
    assert_eq!(gpu_pixels(&cx, &image), expected);
}

#[test]
fn extended_images_keep_their_history_and_readers() {
    let cx = context();
    let src = pattern_image(&cx, "*");
    let mut middle = cx.new_image(1, 1, ImageType::Regular);
    draw(&cx, &middle, &src, 0, 0);
    let reader = cx.new_image(2, 1, ImageType::Regular);
    draw(&cx, &reader, &middle, 1, 0);

    middle.extend(2, 1);
    assert_eq!(middle.history_len(), 1);
    assert_eq!(reader.history_len(), 1);

    lose_and_restore(&cx);
    assert_pattern(&gpu_pixels(&cx, &middle), "*-");
    assert_pattern(&gpu_pixels(&cx, &reader), "-*");
}

#[test]
fn clear_pixels_zeroes_a_region() {
    let cx = context();
    let image = pattern_image(&cx, "****");
    image.clear_pixels(Rect::from_xywh(1, 0, 2, 1));
    assert_pattern(&read(&image, Rect::from_xywh(0, 0, 4, 1)), "*--*");

    lose_and_restore(&cx);
    assert_pattern(&gpu_pixels(&cx, &image), "*--*");
}

#[test]
fn clearing_a_stale_image_makes_it_current() {
    let cx = context();
    let src = pattern_image(&cx, "****");
    let image = cx.new_image(4, 1, ImageType::Regular);
    draw(&cx, &image, &src, 0, 0);
    assert_eq!(image.state(), ImageState::Stale);

    image.clear_pixels(Rect::from_xywh(0, 0, 4, 1));
    assert_eq!(image.state(), ImageState::HasBasePixels);
    assert!(image.stale_regions().is_empty());
}

#[test]
fn caller_buffers_are_copied() {
    let cx = context();
    let mut pixels = solid(WHITE, 4);
    let src = cx.new_image(4, 1, ImageType::Regular);
    src.write_pixels(&pixels, Rect::from_xywh(0, 0, 4, 1));
    pixels.fill(0);

    let dst = cx.new_image(4, 1, ImageType::Regular);
    let mut vertices = quad_vertices(Rect::from_xywh(0, 0, 4, 1), Rect::from_xywh(0, 0, 4, 1), [1.; 4]);
    let mut indices = quad_indices().to_vec();
    dst.draw_triangles(DrawTriangles::new(cx.nearest_filter_shader(), &vertices, &indices).source(0, &src));
    vertices.fill(0.);
    indices.fill(0);

    lose_and_restore(&cx);
    assert_pattern(&gpu_pixels(&cx, &src), "****");
    assert_pattern(&gpu_pixels(&cx, &dst), "****");
}

#[test]
fn overlapping_draws_and_writes_restore() {
    let cx = context();
    let src = cx.new_image_with_pixels(2, 2, &solid(RED, 4));
    let image = cx.new_image(4, 4, ImageType::Regular);
    image.write_pixels(&solid(BLUE, 4), Rect::from_xywh(0, 0, 2, 2));
    draw_with(&cx, &image, &src, 1, 1, Blend::COPY, Hint::None);
    image.write_pixels(&solid(WHITE, 4), Rect::from_xywh(2, 2, 2, 2));
    draw_with(&cx, &image, &src, 2, 0, Blend::COPY, Hint::None);

    let expected = read(&image, Rect::from_xywh(0, 0, 4, 4));
    let px = |x: usize, y: usize| expected[(y * 4 + x) * 4..][..4].to_vec();
    assert_eq!(px(0, 0), BLUE);
    assert_eq!(px(1, 1), RED);
    assert_eq!(px(3, 3), WHITE);
    assert_eq!(px(3, 0), RED);

    lose_and_restore(&cx);
    assert_eq!(gpu_pixels(&cx, &image), expected);
}

#[test]
fn reading_after_a_draw_resolves_the_image() {
    let cx = context();
    let src = pattern_image(&cx, "**");
    let image = cx.new_image(2, 1, ImageType::Regular);
    draw(&cx, &image, &src, 0, 0);
    assert_pattern(&read(&image, Rect::from_xywh(0, 0, 2, 1)), "**");
    assert_eq!(image.state(), ImageState::HasBasePixels);
    assert_eq!(image.base_pixels(), Some(solid(WHITE, 2)));
}

#[test]
fn draw_after_a_write_restores() {
    let cx = context();
    let src = cx.new_image_with_pixels(1, 1, &RED);
    let image = cx.new_image(2, 1, ImageType::Regular);
    image.write_pixels(&BLUE, Rect::from_xywh(1, 0, 1, 1));
    draw(&cx, &image, &src, 0, 0);

    lose_and_restore(&cx);
    assert_eq!(gpu_pixels(&cx, &image), [RED, BLUE].concat());
}

#[test]
fn overwrite_hint_drops_superseded_draws() {
    let cx = context();
    let src = pattern_image(&cx, "**");
    let image = cx.new_image(2, 1, ImageType::Regular);
    for _ in 0..3 {
        draw_with(&cx, &image, &src, 0, 0, Blend::COPY, Hint::OverwriteDstRegion);
    }
    assert_eq!(image.history_len(), 1);

    lose_and_restore(&cx);
    assert_pattern(&gpu_pixels(&cx, &image), "**");
}

#[test]
fn history_cap_falls_back_to_readback() {
    let cx = Context::builder(SoftwareBackend::new())
        .vsync(false)
        .max_history_len(2)
        .build()
        .unwrap();
    let src = pattern_image(&cx, "*");
    let image = cx.new_image(3, 1, ImageType::Regular);
    for x in 0..3 {
        draw(&cx, &image, &src, x, 0);
    }
    assert_eq!(image.history_len(), 0);
    assert_eq!(image.stale_regions(), vec![Rect::from_xywh(0, 0, 3, 1)]);

    lose_and_restore(&cx);
    assert_pattern(&gpu_pixels(&cx, &image), "***");
}

#[test]
fn disposing_a_shader_invalidates_its_users() {
    let cx = context();
    let shader = cx.new_shader(ShaderDesc::new(Program::Texture, ShaderUnit::Pixels));
    let src = pattern_image(&cx, "*");
    let image = cx.new_image(1, 1, ImageType::Regular);
    let vertices = quad_vertices(Rect::from_xywh(0, 0, 1, 1), Rect::from_xywh(0, 0, 1, 1), [1.; 4]);
    image.draw_triangles(DrawTriangles::new(&shader, &vertices, &quad_indices()).source(0, &src));
    assert_eq!(image.history_len(), 1);

    cx.dispose_shader(shader);
    assert_eq!(image.history_len(), 0);
    assert_eq!(image.state(), ImageState::Stale);

    lose_and_restore(&cx);
    assert_pattern(&gpu_pixels(&cx, &image), "*");
}

#[test]
fn non_restorable_contexts_keep_no_records() {
    let cx = Context::builder(SoftwareBackend::new())
        .vsync(false)
        .restorable(false)
        .build()
        .unwrap();
    let image = cx.new_image_with_pixels(1, 1, &RED);
    assert_eq!(image.state(), ImageState::Fresh);
    assert_eq!(image.base_pixels(), None);
    assert_eq!(read(&image, Rect::from_xywh(0, 0, 1, 1)), RED);
    assert!(!cx.restore_if_needed().unwrap());
}

#[test]
fn screen_images_are_not_recorded() {
    let cx = context();
    let src = pattern_image(&cx, "*");
    let screen = cx.new_image(1, 1, ImageType::Screen);
    draw(&cx, &screen, &src, 0, 0);
    assert_eq!(screen.history_len(), 0);
    assert_eq!(read(&screen, Rect::from_xywh(0, 0, 1, 1)), WHITE);

    // Drawing from the screen cannot be replayed.
    let image = cx.new_image(1, 1, ImageType::Regular);
    draw(&cx, &image, &screen, 0, 0);
    assert_eq!(image.state(), ImageState::Stale);
    assert_eq!(image.history_len(), 0);
}

#[test]
fn written_and_drawn_regions_survive_a_resolve() {
    let cx = context();
    let src = pattern_image(&cx, "**");
    let image = cx.new_image(4, 1, ImageType::Regular);
    image.write_pixels(&solid(RED, 2), Rect::from_xywh(0, 0, 2, 1));
    let vertices = quad_vertices(Rect::from_xywh(2, 0, 2, 1), Rect::from_xywh(0, 0, 2, 1), [1.; 4]);
    image.draw_triangles(
        DrawTriangles::new(cx.nearest_filter_shader(), &vertices, &quad_indices())
            .source(0, &src)
            .dst_region(Rect::from_xywh(2, 0, 2, 1)),
    );
    assert_eq!(image.stale_regions(), vec![Rect::from_xywh(2, 0, 2, 1)]);

    // The written region is served from the base pixels.
    assert_eq!(read(&image, Rect::from_xywh(0, 0, 2, 1)), solid(RED, 2));
    assert_eq!(image.state(), ImageState::Stale);

    assert_eq!(read(&image, Rect::from_xywh(2, 0, 2, 1)), solid(WHITE, 2));
    assert_eq!(image.state(), ImageState::HasBasePixels);
    assert_eq!(read(&image, Rect::from_xywh(0, 0, 2, 1)), solid(RED, 2));
}

#[test]
fn clearing_a_drawn_region_drops_the_draw() {
    let cx = context();
    let src = pattern_image(&cx, "**");
    let image = cx.new_image(4, 1, ImageType::Regular);
    let region = Rect::from_xywh(1, 0, 2, 1);
    let vertices = quad_vertices(region, Rect::from_xywh(0, 0, 2, 1), [1.; 4]);
    image.draw_triangles(
        DrawTriangles::new(cx.nearest_filter_shader(), &vertices, &quad_indices())
            .source(0, &src)
            .dst_region(region),
    );
    assert_eq!(image.history_len(), 1);

    image.clear_pixels(region);
    assert_eq!(image.history_len(), 0);
    assert_eq!(image.state(), ImageState::HasBasePixels);

    image.write_pixels(&solid(BLUE, 2), region);
    assert_eq!(image.history_len(), 0);

    lose_and_restore(&cx);
    assert_eq!(
        gpu_pixels(&cx, &image),
        [[0; 4], BLUE, BLUE, [0; 4]].concat()
    );
}

#[test]
fn overwrite_hint_keeps_history_a_self_draw_reads() {
    let cx = context();
    let image = pattern_image(&cx, "*-");
    draw(&cx, &image, &image, 1, 0);
    draw_with(&cx, &image, &image, 0, 0, Blend::COPY, Hint::OverwriteDstRegion);
    assert_eq!(image.history_len(), 2);

    lose_and_restore(&cx);
    assert_pattern(&gpu_pixels(&cx, &image), "**");
}

#[test]
fn failed_flushes_on_the_lost_context_do_not_block_restoration() {
    let cx = context();
    let src = pattern_image(&cx, "*-");
    let dst = cx.new_image(2, 1, ImageType::Regular);
    cx.end_frame().unwrap();
    with_software(&cx, SoftwareBackend::lose_context);

    draw(&cx, &dst, &src, 0, 0);
    cx.flush(false).unwrap();
    assert!(cx.restore_if_needed().unwrap());
    assert_pattern(&gpu_pixels(&cx, &dst), "*-");
}

#[test]
fn backend_failure_aborts_restoration() {
    let cx = context();
    let src = pattern_image(&cx, "*-");
    let dst = cx.new_image(2, 1, ImageType::Regular);
    draw(&cx, &dst, &src, 1, 0);
    cx.end_frame().unwrap();
    with_software(&cx, |backend| {
        backend.lose_context();
        backend.fail_next_draw();
    });

    let err = cx.restore_if_needed().unwrap_err();
    assert!(matches!(err, Error::Backend(BackendError::Device(_))));

    // The records are untouched, so a second pass succeeds.
    cx.restore().unwrap();
    assert_pattern(&gpu_pixels(&cx, &dst), "-*");
}

#[test]
#[should_panic(expected = "outside of the")]
fn regions_past_the_numeric_limit_are_rejected() {
    let cx = context();
    let image = cx.new_image(2, 1, ImageType::Regular);
    image.clear_pixels(Rect::from_xywh(u32::MAX, 0, 2, 1));
}
