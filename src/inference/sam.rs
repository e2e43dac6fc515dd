use std::{
    num::NonZeroU32,
    path::Path,
    sync::{Arc, Weak},
};

use image::{imageops::FilterType, DynamicImage, GenericImageView, RgbImage, Rgba};
use itertools::Itertools;
use log::debug;
use ndarray::{Array, IxDyn};
use ort::{Environment, OrtError, Session, SessionBuilder, Value};

use super::{InferenceError, SegmentationOracle};
use crate::{database::Point, mask::Mask};

const INPUT_SIZE: usize = 1024;

// Label of the padding point, which the decoder expects when no box prompt is given
const PADDING_LABEL: f32 = -1.0;

/// MobileSAM encoder/decoder pair
pub struct SamSession {
    encoder: Arc<Session>,
    decoder: Arc<Session>,
    // Embeddings of the last image, which is kept alive by the Weak
    cache: Option<(Weak<RgbImage>, SamEmbeddings)>,
}

impl SamSession {
    pub fn new(path: &Path) -> Result<Self, InferenceError> {
        let env = Arc::new(Environment::builder().with_name("SAM").build()?);
        let encoder =
            SessionBuilder::new(&env)?.with_model_from_file(path.join("vit_t_encoder.onnx"))?;
        let decoder =
            SessionBuilder::new(&env)?.with_model_from_file(path.join("vit_t_decoder.onnx"))?;
        Ok(Self {
            encoder: Arc::new(encoder),
            decoder: Arc::new(decoder),
            cache: None,
        })
    }

    fn embeddings(&mut self, image: &Arc<RgbImage>) -> Result<&SamEmbeddings, InferenceError> {
        let is_cached = matches!(
            &self.cache,
            Some((cached, _)) if Weak::as_ptr(cached) == Arc::as_ptr(image)
        );
        if !is_cached {
            debug!("Compute embeddings for {:?}", image.dimensions());
            let embeddings = Self::image_embeddings(&self.encoder, image)?;
            self.cache = Some((Arc::downgrade(image), embeddings));
        }
        let (_, embeddings) = self
            .cache
            .as_ref()
            .expect("Cache was filled above");
        Ok(embeddings)
    }

    fn image_embeddings(
        encoder: &Session,
        img: &RgbImage,
    ) -> Result<SamEmbeddings, InferenceError> {
        let image_input = prepare_image_input(img)?;
        let input_as_values = &image_input.image_data.as_standard_layout();
        let encoder_inputs = vec![Value::from_array(encoder.allocator(), input_as_values)?];

        let outputs = encoder.run(encoder_inputs)?;
        let embeddings = outputs
            .first()
            .ok_or_else(|| InferenceError::UnexpectedOutput("Expected a output".into()))?
            .try_extract::<f32>()
            .map_err(|e| InferenceError::UnexpectedOutput(format!("Expected f32: {e:?}")))?
            .view()
            .t()
            .reversed_axes()
            .into_owned();

        Ok(image_input.map(|_| embeddings))
    }

    fn decode_points(
        decoder: &Session,
        embeddings: &SamEmbeddings,
        positive_points: &[Point],
        negative_points: &[Point],
    ) -> Result<Mask, InferenceError> {
        let orig_width = embeddings.original_width.get() as f32;
        let orig_height = embeddings.original_height.get() as f32;
        let scale_x = embeddings.resized_width.get() as f32 / orig_width;
        let scale_y = embeddings.resized_height.get() as f32 / orig_height;

        let prompts = positive_points
            .iter()
            .map(|p| (p, 1.0_f32))
            .chain(negative_points.iter().map(|p| (p, 0.0_f32)))
            .collect::<Vec<_>>();
        let point_count = prompts.len() + 1;

        let coords = prompts
            .iter()
            .flat_map(|(p, _)| [p.x * scale_x, p.y * scale_y])
            .chain([0.0, 0.0])
            .collect::<Vec<_>>();
        let labels = prompts
            .iter()
            .map(|(_, label)| *label)
            .chain([PADDING_LABEL])
            .collect::<Vec<_>>();

        let point_coords = Array::from_shape_vec((1, point_count, 2), coords)
            .map_err(|e| InferenceError::Other(Arc::new(e)))?
            .into_dyn();
        let point_labels = Array::from_shape_vec((1, point_count), labels)
            .map_err(|e| InferenceError::Other(Arc::new(e)))?
            .into_dyn();

        let embeddings_as_values = &embeddings.image_data.as_standard_layout();
        let point_coords_as_values = &point_coords.as_standard_layout();
        let point_labels_as_values = &point_labels.as_standard_layout();

        // No mask prompt
        let mask_input = Array::<f32, _>::zeros((1, 1, 256, 256)).into_dyn();
        let mask_input_as_values = &mask_input.as_standard_layout();
        let has_mask_input = ndarray::array![0.0_f32].into_dyn();
        let has_mask_input_as_values = &has_mask_input.as_standard_layout();

        let orig_im_size = ndarray::array![orig_height, orig_width].into_dyn();
        let orig_im_size_as_values = &orig_im_size.as_standard_layout();

        let decoder_inputs = vec![
            Value::from_array(decoder.allocator(), embeddings_as_values)?,
            Value::from_array(decoder.allocator(), point_coords_as_values)?,
            Value::from_array(decoder.allocator(), point_labels_as_values)?,
            Value::from_array(decoder.allocator(), mask_input_as_values)?,
            Value::from_array(decoder.allocator(), has_mask_input_as_values)?,
            Value::from_array(decoder.allocator(), orig_im_size_as_values)?,
        ];

        let outputs = decoder.run(decoder_inputs)?;
        let logits = outputs
            .first()
            .ok_or_else(|| InferenceError::UnexpectedOutput("No output".into()))?
            .try_extract::<f32>()
            .map_err(|e| InferenceError::UnexpectedOutput(format!("Output of type f32: {e:?}")))?;
        let logits_view = logits.view();

        let (width, height) = (
            embeddings.original_width.get(),
            embeddings.original_height.get(),
        );
        Mask::from_raw(width, height, threshold_logits(logits_view.iter().copied())).ok_or_else(
            || {
                InferenceError::UnexpectedOutput(format!(
                    "Mask has {} pixels, expected {width}x{height}",
                    logits_view.len()
                ))
            },
        )
    }
}

impl SegmentationOracle for SamSession {
    fn segment(
        &mut self,
        image: &Arc<RgbImage>,
        positive_points: &[Point],
        negative_points: &[Point],
    ) -> Result<Mask, InferenceError> {
        if positive_points.is_empty() && negative_points.is_empty() {
            return Err(InferenceError::UnexpectedOutput(
                "At least one point is required".into(),
            ));
        }
        let decoder = self.decoder.clone();
        let embeddings = self.embeddings(image)?;
        Self::decode_points(&decoder, embeddings, positive_points, negative_points)
    }
}

impl From<OrtError> for InferenceError {
    fn from(value: OrtError) -> Self {
        match value {
            e @ OrtError::CreateIoBinding(_) | e @ OrtError::CreateAllocator(_) => {
                InferenceError::AllocationError(Arc::new(e))
            }
            e => InferenceError::Other(Arc::new(e)),
        }
    }
}

type SamEmbeddings = ResizedImageData<Array<f32, IxDyn>>;
type SamInputData = ResizedImageData<Array<f32, IxDyn>>;

#[derive(Debug)]
struct ResizedImageData<T> {
    image_data: T,
    original_width: NonZeroU32,
    original_height: NonZeroU32,
    resized_width: NonZeroU32,
    resized_height: NonZeroU32,
}

impl<T> ResizedImageData<T> {
    fn map<TNew>(self, x: impl FnOnce(T) -> TNew) -> ResizedImageData<TNew> {
        ResizedImageData {
            image_data: (x)(self.image_data),
            original_width: self.original_width,
            original_height: self.original_height,
            resized_width: self.resized_width,
            resized_height: self.resized_height,
        }
    }
}

/// Resizes the longer side to 1024 and normalizes each channel, at the top left
/// of a zero padded 1x3x1024x1024 tensor.
fn prepare_image_input(img: &RgbImage) -> Result<SamInputData, InferenceError> {
    let (width, height) = img.dimensions();
    let (Ok(original_width), Ok(original_height)) =
        (NonZeroU32::try_from(width), NonZeroU32::try_from(height))
    else {
        return Err(InferenceError::ImageTooSmall { width, height });
    };

    let img_resized = DynamicImage::ImageRgb8(img.clone()).resize(
        INPUT_SIZE as u32,
        INPUT_SIZE as u32,
        FilterType::CatmullRom,
    );
    let (resized_width, resized_height) = img_resized.dimensions();
    let (resized_width, resized_height) = (
        NonZeroU32::try_from(resized_width)?,
        NonZeroU32::try_from(resized_height)?,
    );

    let mut input = Array::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));
    let rgb = input
        .as_slice_mut()
        .expect("zeros always returns continuous slice");
    let (r, gb) = rgb.split_at_mut(INPUT_SIZE * INPUT_SIZE);
    let (g, b) = gb.split_at_mut(INPUT_SIZE * INPUT_SIZE);

    let mut rs = rolling_stats::Stats::new();
    let mut gs = rolling_stats::Stats::new();
    let mut bs = rolling_stats::Stats::new();

    for (_, _, Rgba([r, g, b, _])) in img_resized.pixels() {
        rs.update(r as f32);
        gs.update(g as f32);
        bs.update(b as f32);
    }

    for (((input_chunk, r_chunk), g_chunk), b_chunk) in img_resized
        .pixels()
        .chunks(img_resized.width() as _)
        .into_iter()
        .zip(r.chunks_exact_mut(INPUT_SIZE))
        .zip(g.chunks_exact_mut(INPUT_SIZE))
        .zip(b.chunks_exact_mut(INPUT_SIZE))
    {
        for ((((_, _, Rgba([r, g, b, _])), r_dest), g_dest), b_dest) in
            input_chunk.zip(r_chunk).zip(g_chunk).zip(b_chunk)
        {
            *r_dest = (r as f32 - rs.mean) / rs.std_dev;
            *g_dest = (g as f32 - gs.mean) / gs.std_dev;
            *b_dest = (b as f32 - bs.mean) / bs.std_dev;
        }
    }

    Ok(ResizedImageData {
        image_data: input.into_dyn(),
        resized_width,
        resized_height,
        original_width,
        original_height,
    })
}

// Positive logits belong to the object
fn threshold_logits(iter: impl Iterator<Item = f32>) -> Vec<u8> {
    iter.map(|v| (v > 0.0) as u8).collect()
}
