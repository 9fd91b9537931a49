use super::job::{EditType, JobKind, JobParams, Quality, VideoGenerationType};

/// Pure pricing function keyed on `(kind, quality, duration, fps, edit-type,
/// multipliers)`, enumerated rather than derived at runtime. All ceilings
/// apply after multiplication.
pub fn price(kind: JobKind, params: &JobParams) -> Result<i64, String> {
    match kind {
        JobKind::Image => price_image(params),
        JobKind::Video => price_video(params),
        JobKind::Training => price_training(params),
    }
}

fn price_image(params: &JobParams) -> Result<i64, String> {
    if let Some(edit_type) = params.edit_type {
        let multiplier = match edit_type {
            EditType::Inpaint => 1.0,
            EditType::Outpaint => 1.0,
            EditType::Restyle => 1.5,
            EditType::BackgroundReplace => 2.0,
        };
        return Ok(ceil_credits(2.0 * multiplier));
    }

    let quality = params.quality.unwrap_or(Quality::Basic);
    Ok(match quality {
        Quality::Basic => 1,
        Quality::Standard => 2,
        Quality::High => 3,
    })
}

fn quality_multiplier(quality: Quality) -> f64 {
    match quality {
        Quality::Basic => 1.0,
        Quality::Standard => 1.5,
        Quality::High => 2.0,
    }
}

fn price_video(params: &JobParams) -> Result<i64, String> {
    let seconds = params
        .duration_seconds
        .ok_or_else(|| "video pricing requires duration_seconds".to_string())? as f64;

    match params.generation_type {
        Some(VideoGenerationType::TextToVideo) => {
            let quality = params.quality.unwrap_or(Quality::Basic);
            Ok(ceil_credits(
                5.0 * (seconds / 5.0) * quality_multiplier(quality),
            ))
        }
        Some(VideoGenerationType::ImageToVideo) => {
            let quality = params.quality.unwrap_or(Quality::Basic);
            Ok(ceil_credits(
                8.0 * (seconds / 5.0) * quality_multiplier(quality),
            ))
        }
        Some(VideoGenerationType::FrameInterpolation) | Some(VideoGenerationType::Keyframe) => {
            let quality = params.quality.unwrap_or(Quality::Basic);
            Ok(ceil_credits(
                10.0 * (seconds / 5.0) * quality_multiplier(quality),
            ))
        }
        None => {
            let fps = params
                .fps
                .ok_or_else(|| "video pricing requires fps".to_string())? as f64;
            Ok(std::cmp::max(2, ceil_credits(seconds * fps / 16.0)))
        }
    }
}

fn price_training(params: &JobParams) -> Result<i64, String> {
    let steps = params
        .training_steps
        .ok_or_else(|| "training pricing requires training_steps".to_string())?;
    match steps {
        600 => Ok(10),
        1200 => Ok(20),
        2000 => Ok(35),
        other => Err(format!("unsupported training step count: {other}")),
    }
}

fn ceil_credits(value: f64) -> i64 {
    value.ceil() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_params() -> JobParams {
        JobParams {
            prompt: "a cat".to_string(),
            negative_prompt: None,
            model: None,
            quality: None,
            width: None,
            height: None,
            init_image_url: None,
            strength: None,
            caption_init_image: false,
            edit_type: None,
            generation_type: None,
            duration_seconds: None,
            fps: None,
            seed: None,
            training_steps: None,
            metadata: None,
        }
    }

    #[test]
    fn image_quality_tiers() {
        let mut params = base_params();
        params.quality = Some(Quality::Basic);
        assert_eq!(price(JobKind::Image, &params).unwrap(), 1);
        params.quality = Some(Quality::Standard);
        assert_eq!(price(JobKind::Image, &params).unwrap(), 2);
        params.quality = Some(Quality::High);
        assert_eq!(price(JobKind::Image, &params).unwrap(), 3);
    }

    #[test]
    fn image_edit_multipliers() {
        let mut params = base_params();
        params.edit_type = Some(EditType::BackgroundReplace);
        assert_eq!(price(JobKind::Image, &params).unwrap(), 4);
        params.edit_type = Some(EditType::Restyle);
        assert_eq!(price(JobKind::Image, &params).unwrap(), 3);
    }

    #[test]
    fn video_generic_floor() {
        let mut params = base_params();
        params.duration_seconds = Some(1);
        params.fps = Some(12);
        // 1 * 12 / 16 = 0.75 -> ceil 1, but floored to min 2
        assert_eq!(price(JobKind::Video, &params).unwrap(), 2);
    }

    #[test]
    fn video_text_to_video_standard() {
        let mut params = base_params();
        params.generation_type = Some(VideoGenerationType::TextToVideo);
        params.duration_seconds = Some(10);
        params.quality = Some(Quality::Standard);
        // 5 * (10/5) * 1.5 = 15
        assert_eq!(price(JobKind::Video, &params).unwrap(), 15);
    }

    #[test]
    fn training_tiers() {
        let mut params = base_params();
        params.training_steps = Some(1200);
        assert_eq!(price(JobKind::Training, &params).unwrap(), 20);
        params.training_steps = Some(999);
        assert!(price(JobKind::Training, &params).is_err());
    }
}
