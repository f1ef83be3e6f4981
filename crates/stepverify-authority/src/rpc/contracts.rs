//! ABI bindings for the memory manager and step contracts.

use alloy_sol_types::sol;

sol! {
    interface IMemoryManager {
        event MemoryCreated(uint256 _index, bytes32 _initialHash);
        event HTIFExit(uint256 _index, uint64 _exitCode, bool _halt);

        function instantiate(address _owner, address _provider, bytes32 _initialHash) external returns (uint256);
        function proveRead(uint256 _index, uint64 _position, bytes8 _value, bytes32[] calldata _proof) external;
        function proveWrite(uint256 _index, uint64 _position, bytes8 _oldValue, bytes8 _newValue, bytes32[] calldata _proof) external;
        function finishProofPhase(uint256 _index) external;
        function getRWArrays(uint256 _index) external view returns (uint64[] memory, bytes8[] memory, bool[] memory);
        function write(uint256 _index, uint64 _position, bytes8 _value) external;
        function htifExit(uint256 _index) external;
    }

    interface IStep {
        event StepStatus(uint64 cycle, bool halt);

        function step(uint256 _mmIndex) external returns (uint64, bool);
    }

    interface IStepArrays {
        function step(uint64[] calldata _rwPositions, bytes8[] calldata _rwValues, bool[] calldata _isRead) external;
    }
}
