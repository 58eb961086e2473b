use crate::error::ClassifyError;
use image::{imageops::FilterType, ImageError, RgbImage};
use ndarray::Array4;
use std::io::Cursor;

pub const INPUT_SIZE: u32 = 240;
pub const INPUT_SHAPE: [usize; 4] = [1, 3, INPUT_SIZE as usize, INPUT_SIZE as usize];

// ImageNet statistics the network was trained with.
pub const CHANNEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const CHANNEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Decodes any supported format and drops alpha or expands grayscale to RGB.
pub fn decode_image(image_data: &[u8]) -> Result<RgbImage, ClassifyError> {
    let image_reader = image::ImageReader::new(Cursor::new(image_data))
        .with_guessed_format()
        .map_err(ImageError::IoError)?;

    let image = image_reader.decode()?;
    Ok(image.to_rgb8())
}

/// Resizes to the network input and lays the pixels out as a normalised NCHW batch of one.
pub fn to_input_tensor(image: &RgbImage) -> Array4<f32> {
    let resized = image::imageops::resize(image, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);

    let mut input = Array4::zeros(INPUT_SHAPE);
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for channel in 0..3 {
            let value = pixel.0[channel] as f32 / 255.;
            input[[0, channel, y, x]] = (value - CHANNEL_MEAN[channel]) / CHANNEL_STD[channel];
        }
    }

    input
}

pub fn transform_image(image_data: &[u8]) -> Result<Array4<f32>, ClassifyError> {
    let image = decode_image(image_data)?;
    Ok(to_input_tensor(&image))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageBuffer, ImageFormat, Luma, Rgb, Rgba};

    fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut image_data = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut image_data), format)
            .unwrap();
        image_data
    }

    #[test]
    fn test_shape_is_fixed_for_any_resolution() {
        for (width, height) in [(1, 1), (100, 100), (640, 480), (37, 901)] {
            let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(width, height, Rgb([10, 20, 30]));
            let image_data = encode(DynamicImage::ImageRgb8(img), ImageFormat::Png);

            let input = transform_image(&image_data).unwrap();

            assert_eq!(input.shape(), &INPUT_SHAPE);
        }
    }

    #[test]
    fn test_channels_are_normalised() {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(64, 64, Rgb([255, 0, 0]));
        let image_data = encode(DynamicImage::ImageRgb8(img), ImageFormat::Png);

        let input = transform_image(&image_data).unwrap();

        let expected = [
            (1.0 - CHANNEL_MEAN[0]) / CHANNEL_STD[0],
            (0.0 - CHANNEL_MEAN[1]) / CHANNEL_STD[1],
            (0.0 - CHANNEL_MEAN[2]) / CHANNEL_STD[2],
        ];
        for (channel, want) in expected.iter().enumerate() {
            let got = input[[0, channel, 120, 120]];
            assert!((got - want).abs() < 1e-4, "channel {}: {} != {}", channel, got, want);
        }
    }

    #[test]
    fn test_grayscale_and_alpha_become_three_channels() {
        let gray = ImageBuffer::<Luma<u8>, Vec<u8>>::from_pixel(50, 80, Luma([128]));
        let rgba = ImageBuffer::<Rgba<u8>, Vec<u8>>::from_pixel(80, 50, Rgba([0, 255, 0, 10]));

        let gray = transform_image(&encode(DynamicImage::ImageLuma8(gray), ImageFormat::Png));
        let rgba = transform_image(&encode(DynamicImage::ImageRgba8(rgba), ImageFormat::Png));

        assert_eq!(gray.unwrap().shape(), &INPUT_SHAPE);
        assert_eq!(rgba.unwrap().shape(), &INPUT_SHAPE);
    }

    #[test]
    fn test_jpeg_is_decoded() {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(300, 200, Rgb([40, 160, 40]));
        let image_data = encode(DynamicImage::ImageRgb8(img), ImageFormat::Jpeg);

        assert!(transform_image(&image_data).is_ok());
    }

    #[test]
    fn test_non_image_is_decode_error() {
        let result = transform_image(b"definitely not an image");
        assert!(matches!(result, Err(ClassifyError::Decode(_))));

        let result = transform_image(&[]);
        assert!(matches!(result, Err(ClassifyError::Decode(_))));
    }

    #[test]
    fn test_same_bytes_give_same_tensor() {
        let img = ImageBuffer::from_fn(90, 70, |x, y| Rgb([(x * 2) as u8, (y * 3) as u8, 77]));
        let image_data = encode(DynamicImage::ImageRgb8(img), ImageFormat::Png);

        assert_eq!(
            transform_image(&image_data).unwrap(),
            transform_image(&image_data).unwrap()
        );
    }

    #[test]
    fn test_resize_does_not_overshoot_edges() {
        // Bilinear interpolation stays within the input range; cubic filters ring past it.
        let img = ImageBuffer::from_fn(8, 8, |x, _| {
            if x < 4 {
                Rgb([50; 3])
            } else {
                Rgb([200; 3])
            }
        });

        let input = to_input_tensor(&img);

        for channel in 0..3 {
            for &value in input.index_axis(ndarray::Axis(1), channel).iter() {
                let pixel = (value * CHANNEL_STD[channel] + CHANNEL_MEAN[channel]) * 255.0;
                assert!((49.5..=200.5).contains(&pixel), "channel {}: {}", channel, pixel);
            }
        }
    }
}
