use crate::manifest::axml::{AxmlDocument, XmlAttribute, TYPE_INT_BOOLEAN, TYPE_STRING};
use crate::manifest::ManifestError;

pub const ANDROID_NAMESPACE: &str = "http://schemas.android.com/apk/res/android";

const EXTRACT_NATIVE_LIBS: &str = "extractNativeLibs";
const EXTRACT_NATIVE_LIBS_RES_ID: u32 = 0x010104ea;
const BOOL_TRUE: u32 = 0xFFFFFFFF;

pub struct ManifestEditor {
    doc: AxmlDocument,
    dirty: bool,
}

impl ManifestEditor {
    pub fn from_data(data: &[u8]) -> Result<ManifestEditor, ManifestError> {
        Ok(ManifestEditor {
            doc: AxmlDocument::from_data(data)?,
            dirty: false,
        })
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn to_data(&self) -> Vec<u8> {
        self.doc.to_data()
    }

    fn application_index(&self) -> Result<usize, ManifestError> {
        self.doc
            .root
            .children
            .iter()
            .position(|child| child.tag_name == "application")
            .ok_or(ManifestError::MissingApplication)
    }

    pub fn extract_native_libs(&self) -> Option<bool> {
        let application = self
            .doc
            .root
            .children
            .iter()
            .find(|child| child.tag_name == "application")?;
        let attr = application
            .attrs
            .iter()
            .find(|attr| is_extract_native_libs(attr))?;
        match attr.value_type {
            TYPE_INT_BOOLEAN => Some(attr.data != 0),
            TYPE_STRING => Some(attr.string_value.as_deref() == Some("true")),
            _ => Some(false),
        }
    }

    /// Makes sure the application element declares
    /// `android:extractNativeLibs="true"`. Returns whether the document
    /// changed; an already-true manifest is left untouched.
    pub fn ensure_extract_native_libs(&mut self) -> Result<bool, ManifestError> {
        let app_index = self.application_index()?;

        let existing = self.doc.root.children[app_index]
            .attrs
            .iter()
            .position(is_extract_native_libs);

        if let Some(attr_index) = existing {
            let attr = &mut self.doc.root.children[app_index].attrs[attr_index];
            if attr.value_type == TYPE_INT_BOOLEAN && attr.data == BOOL_TRUE {
                return Ok(false);
            }
            attr.value_type = TYPE_INT_BOOLEAN;
            attr.string_value = None;
            attr.data = BOOL_TRUE;
            self.dirty = true;
            return Ok(true);
        }

        self.doc
            .ensure_resource_name(EXTRACT_NATIVE_LIBS, EXTRACT_NATIVE_LIBS_RES_ID);

        // keep the framework's expected order: resource attrs ascending by
        // id, plain-name attrs after them
        let insert_at = {
            let application = &self.doc.root.children[app_index];
            application
                .attrs
                .iter()
                .position(|attr| {
                    if attr.namespace_uri.as_deref() != Some(ANDROID_NAMESPACE) {
                        return true;
                    }
                    match self.doc.resource_id(&attr.name) {
                        Some(id) => id > EXTRACT_NATIVE_LIBS_RES_ID,
                        None => true,
                    }
                })
                .unwrap_or(application.attrs.len())
        };

        self.doc.root.children[app_index].attrs.insert(
            insert_at,
            XmlAttribute {
                namespace_uri: Some(ANDROID_NAMESPACE.to_string()),
                name: EXTRACT_NATIVE_LIBS.to_string(),
                resource_name: true,
                value_type: TYPE_INT_BOOLEAN,
                string_value: None,
                data: BOOL_TRUE,
            },
        );
        self.dirty = true;
        Ok(true)
    }
}

fn is_extract_native_libs(attr: &XmlAttribute) -> bool {
    attr.namespace_uri.as_deref() == Some(ANDROID_NAMESPACE) && attr.name == EXTRACT_NATIVE_LIBS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{manifest_without_application, minimal_manifest};

    #[test]
    fn adds_missing_attribute() {
        let mut editor = ManifestEditor::from_data(&minimal_manifest(None)).unwrap();
        assert_eq!(editor.extract_native_libs(), None);

        assert!(editor.ensure_extract_native_libs().unwrap());
        assert!(editor.is_dirty());

        let reparsed = ManifestEditor::from_data(&editor.to_data()).unwrap();
        assert_eq!(reparsed.extract_native_libs(), Some(true));
    }

    #[test]
    fn flips_false_to_true() {
        let mut editor = ManifestEditor::from_data(&minimal_manifest(Some(false))).unwrap();
        assert_eq!(editor.extract_native_libs(), Some(false));

        assert!(editor.ensure_extract_native_libs().unwrap());

        let reparsed = ManifestEditor::from_data(&editor.to_data()).unwrap();
        assert_eq!(reparsed.extract_native_libs(), Some(true));
    }

    #[test]
    fn true_manifest_is_not_rewritten() {
        let mut editor = ManifestEditor::from_data(&minimal_manifest(Some(true))).unwrap();
        assert!(!editor.ensure_extract_native_libs().unwrap());
        assert!(!editor.is_dirty());
    }

    #[test]
    fn missing_application_is_fatal() {
        let mut editor = ManifestEditor::from_data(&manifest_without_application()).unwrap();
        assert!(matches!(
            editor.ensure_extract_native_libs(),
            Err(ManifestError::MissingApplication)
        ));
    }

    #[test]
    fn new_attribute_gets_a_resource_map_entry() {
        let mut editor = ManifestEditor::from_data(&minimal_manifest(None)).unwrap();
        editor.ensure_extract_native_libs().unwrap();

        let reparsed = ManifestEditor::from_data(&editor.to_data()).unwrap();
        assert_eq!(
            reparsed.doc.resource_id(EXTRACT_NATIVE_LIBS),
            Some(EXTRACT_NATIVE_LIBS_RES_ID)
        );
    }
}
