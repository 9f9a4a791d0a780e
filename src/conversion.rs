use crate::export::ClassMap;
use crate::types::{AnnotationRecord, BoundingBox, ImageSize, YoloBox};

/// Convert an annotation to YOLO label text, one `class_id cx cy w h` line per object
/// in the record's object order.
pub fn convert_to_yolo_format(
    record: &AnnotationRecord,
    size: ImageSize,
    class_map: &ClassMap,
) -> Result<String, String> {
    let mut yolo_data = String::with_capacity(record.objects.len() * 64);

    for object in &record.objects {
        let class_id = class_map
            .id_of(&object.class_label)
            .ok_or_else(|| format!("label '{}' missing from class map", object.class_label))?;
        let (x_center, y_center, width, height) = calculate_bounding_box(&object.bbox, size);
        push_yolo_line(
            &mut yolo_data,
            class_id,
            YoloBox {
                cx: x_center,
                cy: y_center,
                w: width,
                h: height,
            },
        );
    }

    Ok(yolo_data)
}

/// Append one label line with six decimals per coordinate.
pub fn push_yolo_line(yolo_data: &mut String, class_id: usize, bbox: YoloBox) {
    yolo_data.push_str(&format!(
        "{} {:.6} {:.6} {:.6} {:.6}\n",
        class_id, bbox.cx, bbox.cy, bbox.w, bbox.h
    ));
}

/// Calculate the normalized bounding box (center x, center y, width, height) for YOLO format
pub fn calculate_bounding_box(bbox: &BoundingBox, size: ImageSize) -> (f64, f64, f64, f64) {
    let YoloBox { cx, cy, w, h } = bbox.to_yolo(size);
    (cx, cy, w, h)
}
