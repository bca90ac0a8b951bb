//! The identity that Discover Identity reports.
use heapless::Vec;

use crate::protocol_layer::message::data::vendor_defined::{
    AmaVdo, CableVdo, CertStatVdo, IdHeaderVdo, ProductType, ProductVdo,
};

/// Identity of a port or cable plug.
///
/// The ID header and certification status are mandatory. They are followed by the product VDO,
/// and by a cable or AMA VDO depending on the product type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Identity {
    /// The ID header.
    pub id_header: IdHeaderVdo,
    /// Certification status.
    pub cert_stat: CertStatVdo,
    /// Product.
    pub product: Option<ProductVdo>,
    /// Cable properties, for cable plugs.
    pub cable: Option<CableVdo>,
    /// Alternate mode adapter properties.
    pub ama: Option<AmaVdo>,
}

impl Identity {
    /// Decode the VDOs of a Discover Identity ACK, without the VDM header.
    ///
    /// Returns `None` if the mandatory objects are missing.
    pub fn from_vdos(vdos: &[u32]) -> Option<Self> {
        let (&id_header, rest) = vdos.split_first()?;
        let (&cert_stat, rest) = rest.split_first()?;

        let id_header = IdHeaderVdo(id_header);
        let product = rest.first().map(|vdo| ProductVdo(*vdo));
        let type_specific = rest.get(1).copied();

        let (cable, ama) = match id_header.product_type() {
            ProductType::PassiveCable | ProductType::ActiveCable => (type_specific.map(CableVdo), None),
            ProductType::Ama => (None, type_specific.map(AmaVdo)),
            _ => (None, None),
        };

        Some(Self {
            id_header,
            cert_stat: CertStatVdo(cert_stat),
            product,
            cable,
            ama,
        })
    }

    /// Encode into the VDOs of a Discover Identity ACK.
    pub fn to_vdos(&self) -> Vec<u32, 6> {
        let mut vdos = Vec::new();

        // At most five objects are pushed.
        let _ = vdos.push(self.id_header.0);
        let _ = vdos.push(self.cert_stat.0);
        if let Some(product) = self.product {
            let _ = vdos.push(product.0);

            if let Some(cable) = self.cable {
                let _ = vdos.push(cable.0);
            } else if let Some(ama) = self.ama {
                let _ = vdos.push(ama.0);
            }
        }

        vdos
    }
}

#[cfg(test)]
mod tests {
    use super::Identity;
    use crate::protocol_layer::message::data::vendor_defined::{
        AmaVdo, CertStatVdo, IdHeaderVdo, ProductType, ProductVdo,
    };

    #[test]
    fn ama_identity_keeps_product_before_ama() {
        let identity = Identity {
            id_header: IdHeaderVdo(0)
                .with_product_type(ProductType::Ama)
                .with_modal_supported(true)
                .with_vid(0x1234),
            cert_stat: CertStatVdo(0).with_xid(7),
            product: Some(ProductVdo(0).with_pid(0x5678).with_bcd_device(0x0100)),
            cable: None,
            ama: Some(AmaVdo(0).with_vconn_required(true)),
        };

        let vdos = identity.to_vdos();
        assert_eq!(vdos.len(), 4);
        assert_eq!(vdos[2], 0x5678_0100);
        assert_eq!(Identity::from_vdos(&vdos), Some(identity));
    }

    #[test]
    fn mandatory_objects_are_required() {
        assert_eq!(Identity::from_vdos(&[0x0000_1234]), None);

        let identity = Identity::from_vdos(&[IdHeaderVdo(0).with_product_type(ProductType::Peripheral).0, 0]).unwrap();
        assert_eq!(identity.id_header.product_type(), ProductType::Peripheral);
        assert_eq!(identity.product, None);
    }
}
